mod test_codec;
mod test_mangler;

use crate::isup::codec::{Msu, Ss7Label};
use crate::isup::Ss7Layer;
use crate::party::{AppMessage, DispatchNotify, Dispatcher};
use crate::Result;
use std::sync::{Arc, Mutex};

/// SS7 layer stub recording forwarded MSUs.
pub(crate) struct MockSs7 {
    pub sent: Mutex<Vec<(Msu, Ss7Label, u8)>>,
    pub fail: bool,
}

impl MockSs7 {
    pub fn new() -> Arc<Self> {
        Arc::new(MockSs7 {
            sent: Mutex::new(Vec::new()),
            fail: false,
        })
    }
}

impl Ss7Layer for MockSs7 {
    fn transmit_msu(&self, msu: &Msu, label: &Ss7Label, sls: u8) -> Result<()> {
        if self.fail {
            return Err(crate::Error::TransmitError("link down".to_string()));
        }
        self.sent.lock().unwrap().push((msu.clone(), *label, sls));
        Ok(())
    }
}

/// Dispatch fabric stub rewriting one parameter before completing.
pub(crate) struct MangleDispatcher {
    pub rewrite: Option<(String, String)>,
    pub accept: bool,
    pub seen: Mutex<Vec<AppMessage>>,
}

impl MangleDispatcher {
    pub fn rewriting(name: &str, value: &str) -> Arc<Self> {
        Arc::new(MangleDispatcher {
            rewrite: Some((name.to_string(), value.to_string())),
            accept: true,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn declining() -> Arc<Self> {
        Arc::new(MangleDispatcher {
            rewrite: None,
            accept: false,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl Dispatcher for MangleDispatcher {
    fn dispatch(&self, msg: &mut AppMessage) -> bool {
        self.seen.lock().unwrap().push(msg.clone());
        if let Some((n, v)) = &self.rewrite {
            msg.set_param(n, v);
        }
        self.accept
    }

    fn enqueue(&self, mut msg: AppMessage, notify: DispatchNotify) -> bool {
        let ok = self.dispatch(&mut msg);
        notify(msg, ok);
        true
    }
}

pub(crate) fn unit_config(name: &str) -> AppMessage {
    let mut cfg = AppMessage::new(name);
    cfg.add_param("pointcode", "100");
    cfg.add_param("remotepointcode", "200");
    cfg
}

pub(crate) fn sample_iam() -> AppMessage {
    let mut params = AppMessage::new("IAM");
    params.add_param("NatureOfConnectionIndicators", "0");
    params.add_param("ForwardCallIndicators", "96");
    params.add_param("CallingPartyCategory", "10");
    params.add_param("TransmissionMediumRequirement", "0");
    params.add_param("CalledPartyNumber", "15551234");
    params.add_param("CalledPartyNumber.nature", "national");
    params.add_param("CalledPartyNumber.plan", "isdn");
    params.add_param("CalledPartyNumber.inn", "false");
    params
}
