//! ISUP message interception at a signal transfer point: demultiplex MSUs,
//! decode the targeted message types, hand them to the external dispatch
//! fabric for mangling and forward the re-encoded result.

pub mod codec;
pub use codec::{LabelKind, Msu, Ss7Label};

#[cfg(test)]
mod tests;

use crate::party::{AppMessage, Dispatcher};
use crate::Result;
use codec::{msg_name, msg_type, parse_point_code, MSG_IAM, SIF_ISUP};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Verdict on an inbound MSU. Rejected units let the message flow through
/// the transfer point unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandledMsu {
    Rejected,
    Accepted,
}

/// The lower SS7 layer the mangled messages are transmitted through.
pub trait Ss7Layer: Send + Sync {
    fn transmit_msu(&self, msu: &Msu, label: &Ss7Label, sls: u8) -> Result<()>;
}

struct UnitState {
    point_codes: HashSet<u32>,
    remotes: HashSet<u32>,
    symmetric: bool,
    intercept: HashSet<u8>,
    label_kind: LabelKind,
    ssf: u8,
}

/// One intercept unit: a set of owned point codes, the remote set it
/// exchanges traffic with and the message types it pulls out of the flow.
pub struct IsupIntercept {
    name: String,
    used: AtomicBool,
    state: Mutex<UnitState>,
    ss7: Arc<dyn Ss7Layer>,
}

impl IsupIntercept {
    pub fn new(name: &str, config: &AppMessage, ss7: Arc<dyn Ss7Layer>) -> Arc<Self> {
        let unit = Arc::new(IsupIntercept {
            name: name.to_string(),
            used: AtomicBool::new(true),
            state: Mutex::new(UnitState {
                point_codes: HashSet::new(),
                remotes: HashSet::new(),
                symmetric: false,
                intercept: HashSet::from([MSG_IAM]),
                label_kind: LabelKind::Itu,
                ssf: 0x80,
            }),
            ss7,
        });
        unit.initialize(config);
        unit
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Relaxed)
    }

    pub fn set_used(&self, used: bool) {
        self.used.store(used, Ordering::Relaxed);
    }

    /// Apply (or re-apply) a configuration section to this unit.
    pub fn initialize(&self, config: &AppMessage) {
        let mut st = match self.state.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        st.label_kind = match config.get_value("pointcodetype") {
            Some(t) if t.eq_ignore_ascii_case("ansi") => LabelKind::Ansi,
            _ => LabelKind::Itu,
        };
        st.symmetric = config.get_bool("symmetric", st.symmetric);
        st.ssf = (config.get_int("ssf", i64::from(st.ssf >> 4)) as u8) << 4;
        if let Some(codes) = config.get_value("pointcode") {
            st.point_codes = parse_pc_list(st.label_kind, codes);
        }
        if let Some(codes) = config.get_value("remotepointcode") {
            st.remotes = parse_pc_list(st.label_kind, codes);
        }
        if let Some(types) = config.get_value("intercept") {
            let set: HashSet<u8> = types
                .split(',')
                .filter_map(|t| msg_type(t.trim()))
                .collect();
            if !set.is_empty() {
                st.intercept = set;
            }
        }
        debug!(
            "unit '{}' handles {} point codes, {} remote",
            self.name,
            st.point_codes.len(),
            st.remotes.len()
        );
    }

    pub fn label_kind(&self) -> LabelKind {
        self.state
            .lock()
            .map(|s| s.label_kind)
            .unwrap_or(LabelKind::Itu)
    }

    /// Offer an inbound MSU to this unit. Accepted MSUs are consumed:
    /// decoded, enqueued for mangling and later re-encoded and forwarded.
    pub fn received_msu(
        &self,
        msu: &Msu,
        label: &Ss7Label,
        sls: u8,
        dispatcher: &Arc<dyn Dispatcher>,
    ) -> HandledMsu {
        if msu.sif() != SIF_ISUP {
            return HandledMsu::Rejected;
        }
        let (wanted, ssf) = {
            let st = match self.state.lock() {
                Ok(s) => s,
                Err(p) => p.into_inner(),
            };
            let direct = st.point_codes.contains(&label.dpc) && st.remotes.contains(&label.opc);
            let reverse = st.symmetric
                && st.point_codes.contains(&label.opc)
                && st.remotes.contains(&label.dpc);
            if !direct && !reverse {
                return HandledMsu::Rejected;
            }
            (st.intercept.clone(), st.ssf)
        };
        // at least 2 bytes CIC and 1 byte message type after the label
        let payload = &msu.data[label.length().min(msu.data.len())..];
        if payload.len() < 3 {
            debug!("got short MSU");
            return HandledMsu::Rejected;
        }
        let cic = u16::from(payload[0]) | u16::from(payload[1]) << 8;
        let mtype = payload[2];
        if msg_name(mtype).is_none() {
            debug!(
                "received unknown ISUP type 0x{:02x}, cic={}, length {}",
                mtype,
                cic,
                payload.len()
            );
        }
        if !wanted.contains(&mtype) {
            // let the message pass through
            return HandledMsu::Rejected;
        }
        if self.process_msu(mtype, cic, &payload[3..], label, ssf, sls, dispatcher) {
            HandledMsu::Accepted
        } else {
            HandledMsu::Rejected
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_msu(
        &self,
        mtype: u8,
        cic: u16,
        param_area: &[u8],
        label: &Ss7Label,
        ssf: u8,
        sls: u8,
        dispatcher: &Arc<dyn Dispatcher>,
    ) -> bool {
        let mut m = AppMessage::new("isup.mangle");
        m.add_param("address", &format!("{}/{}", self.name, cic));
        m.add_param("sls", &sls.to_string());
        if !codec::decode_message(&mut m, mtype, param_area) {
            return false;
        }
        debug!(
            "received message '{}' cic={} label={}",
            msg_name(mtype).unwrap_or("?"),
            cic,
            label
        );
        let ss7 = self.ss7.clone();
        let label = *label;
        dispatcher.enqueue(
            m,
            // completion of the mangle dispatch: re-encode the possibly
            // mutated parameters and put the MSU back on the wire, even
            // when no handler accepted it
            Box::new(move |msg, _accepted| {
                let sent = codec::create_msu(mtype, ssf, &label, cic, &msg)
                    .and_then(|msu| ss7.transmit_msu(&msu, &label, sls));
                if let Err(e) = sent {
                    warn!(
                        "failed to forward mangled {} ({}): {}",
                        msg_name(mtype).unwrap_or("?"),
                        cic,
                        e
                    );
                }
            }),
        )
    }
}

fn parse_pc_list(kind: LabelKind, text: &str) -> HashSet<u32> {
    text.split([',', ' '])
        .filter(|t| !t.trim().is_empty())
        .filter_map(|t| {
            let pc = parse_point_code(kind, t);
            if pc.is_none() {
                warn!("ignoring unparseable point code '{}'", t);
            }
            pc
        })
        .collect()
}

/// The set of intercept units, rebuilt from configuration sections. Units
/// not mentioned by the new configuration are dropped.
pub struct IsupMangler {
    units: Mutex<Vec<Arc<IsupIntercept>>>,
}

impl Default for IsupMangler {
    fn default() -> Self {
        Self::new()
    }
}

impl IsupMangler {
    pub fn new() -> Self {
        IsupMangler {
            units: Mutex::new(Vec::new()),
        }
    }

    pub fn find(&self, name: &str) -> Option<Arc<IsupIntercept>> {
        self.units
            .lock()
            .ok()?
            .iter()
            .find(|u| u.name() == name)
            .cloned()
    }

    pub fn unit_count(&self) -> usize {
        self.units.lock().map(|u| u.len()).unwrap_or(0)
    }

    /// Reconfigure from named sections: reuse units by name, create the
    /// missing ones, drop the ones no longer configured.
    pub fn initialize(&self, sections: &[AppMessage], ss7: &Arc<dyn Ss7Layer>) {
        info!("initializing ISUP mangler");
        let mut units = match self.units.lock() {
            Ok(u) => u,
            Err(p) => p.into_inner(),
        };
        for unit in units.iter() {
            unit.set_used(false);
        }
        for sect in sections {
            if sect.name.is_empty() || !sect.get_bool("enable", true) {
                continue;
            }
            match units.iter().find(|u| u.name() == sect.name) {
                Some(unit) => {
                    unit.set_used(true);
                    unit.initialize(sect);
                }
                None => {
                    units.push(IsupIntercept::new(&sect.name, sect, ss7.clone()));
                }
            }
        }
        units.retain(|u| u.is_used());
    }

    /// Offer an MSU to every unit until one accepts it.
    pub fn handle_msu(
        &self,
        msu: &Msu,
        label: &Ss7Label,
        sls: u8,
        dispatcher: &Arc<dyn Dispatcher>,
    ) -> HandledMsu {
        let units = match self.units.lock() {
            Ok(u) => u.clone(),
            Err(p) => p.into_inner().clone(),
        };
        for unit in units {
            if unit.received_msu(msu, label, sls, dispatcher) == HandledMsu::Accepted {
                return HandledMsu::Accepted;
            }
        }
        HandledMsu::Rejected
    }
}
