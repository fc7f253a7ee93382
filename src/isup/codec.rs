//! ISUP wire codec: MTP3 routing labels, MSUs and the parameter area of
//! the intercepted message types.

use crate::party::AppMessage;
use crate::{Error, Result};
use tracing::debug;

/// Service indicator of ISUP within the SIO.
pub const SIF_ISUP: u8 = 0x05;

/// ISUP message type byte for the Initial Address Message.
pub const MSG_IAM: u8 = 0x01;

/// Known ISUP message type names, for diagnostics and the intercept list.
const MSG_NAMES: &[(u8, &str)] = &[
    (0x01, "IAM"),
    (0x02, "SAM"),
    (0x06, "ACM"),
    (0x07, "CON"),
    (0x09, "ANM"),
    (0x0c, "REL"),
    (0x0d, "SUS"),
    (0x0e, "RES"),
    (0x10, "RLC"),
    (0x2c, "CPG"),
];

pub fn msg_name(msg_type: u8) -> Option<&'static str> {
    MSG_NAMES
        .iter()
        .find(|(t, _)| *t == msg_type)
        .map(|(_, n)| *n)
}

pub fn msg_type(name: &str) -> Option<u8> {
    MSG_NAMES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(t, _)| *t)
}

/// Routing label flavor: ITU packs both point codes and the SLS in four
/// bytes, ANSI spends three bytes per point code plus an SLS byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Itu,
    Ansi,
}

/// MTP3 routing label: destination and origin point codes plus the
/// signaling link selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ss7Label {
    pub kind: LabelKind,
    pub dpc: u32,
    pub opc: u32,
    pub sls: u8,
}

impl Ss7Label {
    pub fn new(kind: LabelKind, dpc: u32, opc: u32, sls: u8) -> Self {
        Ss7Label { kind, dpc, opc, sls }
    }

    /// Encoded length in bytes.
    pub fn length(&self) -> usize {
        match self.kind {
            LabelKind::Itu => 4,
            LabelKind::Ansi => 7,
        }
    }

    pub fn parse(kind: LabelKind, data: &[u8]) -> Option<Self> {
        match kind {
            LabelKind::Itu => {
                if data.len() < 4 {
                    return None;
                }
                let word = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                Some(Ss7Label {
                    kind,
                    dpc: word & 0x3fff,
                    opc: (word >> 14) & 0x3fff,
                    sls: ((word >> 28) & 0x0f) as u8,
                })
            }
            LabelKind::Ansi => {
                if data.len() < 7 {
                    return None;
                }
                Some(Ss7Label {
                    kind,
                    dpc: u32::from(data[0]) | u32::from(data[1]) << 8 | u32::from(data[2]) << 16,
                    opc: u32::from(data[3]) | u32::from(data[4]) << 8 | u32::from(data[5]) << 16,
                    sls: data[6],
                })
            }
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        match self.kind {
            LabelKind::Itu => {
                let word = (self.dpc & 0x3fff)
                    | (self.opc & 0x3fff) << 14
                    | u32::from(self.sls & 0x0f) << 28;
                out.extend_from_slice(&word.to_le_bytes());
            }
            LabelKind::Ansi => {
                out.push((self.dpc & 0xff) as u8);
                out.push((self.dpc >> 8 & 0xff) as u8);
                out.push((self.dpc >> 16 & 0xff) as u8);
                out.push((self.opc & 0xff) as u8);
                out.push((self.opc >> 8 & 0xff) as u8);
                out.push((self.opc >> 16 & 0xff) as u8);
                out.push(self.sls);
            }
        }
    }
}

impl std::fmt::Display for Ss7Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.dpc, self.opc, self.sls)
    }
}

/// A Message Signal Unit: the SIO byte and everything after it, routing
/// label included.
#[derive(Debug, Clone, PartialEq)]
pub struct Msu {
    pub sio: u8,
    pub data: Vec<u8>,
}

impl Msu {
    pub fn new(sio: u8, data: Vec<u8>) -> Self {
        Msu { sio, data }
    }

    /// Service indicator: low nibble of the SIO.
    pub fn sif(&self) -> u8 {
        self.sio & 0x0f
    }

    /// Subservice field: high nibble of the SIO.
    pub fn ssf(&self) -> u8 {
        self.sio & 0xf0
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Parse a point code, either plain decimal or the dashed a-b-c form
/// (3-8-3 bits for ITU, 8-8-8 for ANSI).
pub fn parse_point_code(kind: LabelKind, text: &str) -> Option<u32> {
    let text = text.trim();
    if let Ok(pc) = text.parse::<u32>() {
        return Some(pc);
    }
    let parts: Vec<u32> = text
        .split('-')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<Vec<u32>>>()?;
    if parts.len() != 3 {
        return None;
    }
    match kind {
        LabelKind::Itu => Some((parts[0] & 0x07) << 11 | (parts[1] & 0xff) << 3 | (parts[2] & 0x07)),
        LabelKind::Ansi => Some((parts[0] & 0xff) << 16 | (parts[1] & 0xff) << 8 | (parts[2] & 0xff)),
    }
}

const NATURE_NAMES: &[(u8, &str)] = &[
    (1, "subscriber"),
    (2, "unknown"),
    (3, "national"),
    (4, "international"),
];

const PLAN_NAMES: &[(u8, &str)] = &[(1, "isdn"), (3, "data"), (4, "telex")];

const PRESENTATION_NAMES: &[(u8, &str)] = &[(0, "allowed"), (1, "restricted"), (2, "unavailable")];

const SCREENING_NAMES: &[(u8, &str)] =
    &[(0, "user-provided"), (1, "verified-passed"), (2, "verified-failed"), (3, "network-provided")];

fn name_of(table: &[(u8, &str)], value: u8) -> String {
    table
        .iter()
        .find(|(v, _)| *v == value)
        .map(|(_, n)| n.to_string())
        .unwrap_or_else(|| value.to_string())
}

fn value_of(table: &[(u8, &str)], name: &str) -> Option<u8> {
    if let Ok(v) = name.trim().parse() {
        return Some(v);
    }
    table
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(v, _)| *v)
}

/// Unpack BCD digits, low nibble first. The odd flag tells whether the
/// last high nibble is a filler.
fn decode_digits(data: &[u8], odd: bool) -> String {
    let mut nibbles = Vec::with_capacity(data.len() * 2);
    for byte in data {
        nibbles.push(byte & 0x0f);
        nibbles.push(byte >> 4);
    }
    if odd {
        nibbles.pop();
    }
    nibbles
        .into_iter()
        .filter_map(|n| match n {
            0..=9 => Some((b'0' + n) as char),
            0x0b => Some('*'),
            0x0c => Some('#'),
            _ => None,
        })
        .collect()
}

fn encode_digits(digits: &str) -> (Vec<u8>, bool) {
    let values: Vec<u8> = digits
        .chars()
        .filter_map(|c| match c {
            '0'..='9' => Some(c as u8 - b'0'),
            '*' => Some(0x0b),
            '#' => Some(0x0c),
            _ => None,
        })
        .collect();
    let odd = values.len() % 2 == 1;
    let mut out = Vec::with_capacity(values.len().div_ceil(2));
    for pair in values.chunks(2) {
        let low = pair[0];
        let high = pair.get(1).copied().unwrap_or(0);
        out.push(low | high << 4);
    }
    (out, odd)
}

fn decode_called_number(params: &mut AppMessage, data: &[u8]) {
    if data.len() < 2 {
        return;
    }
    let odd = data[0] & 0x80 != 0;
    let nature = data[0] & 0x7f;
    let inn = data[1] & 0x80 != 0;
    let plan = (data[1] >> 4) & 0x07;
    params.add_param("CalledPartyNumber", &decode_digits(&data[2..], odd));
    params.add_param("CalledPartyNumber.nature", &name_of(NATURE_NAMES, nature));
    params.add_param("CalledPartyNumber.plan", &name_of(PLAN_NAMES, plan));
    params.add_param(
        "CalledPartyNumber.inn",
        if inn { "true" } else { "false" },
    );
}

fn encode_called_number(params: &AppMessage) -> Vec<u8> {
    let digits = params.get_value("CalledPartyNumber").unwrap_or("");
    let nature = params
        .get_value("CalledPartyNumber.nature")
        .and_then(|n| value_of(NATURE_NAMES, n))
        .unwrap_or(3);
    let plan = params
        .get_value("CalledPartyNumber.plan")
        .and_then(|p| value_of(PLAN_NAMES, p))
        .unwrap_or(1);
    let inn = params.get_value("CalledPartyNumber.inn") == Some("true");
    let (packed, odd) = encode_digits(digits);
    let mut out = Vec::with_capacity(packed.len() + 2);
    out.push(nature & 0x7f | if odd { 0x80 } else { 0 });
    out.push((plan & 0x07) << 4 | if inn { 0x80 } else { 0 });
    out.extend_from_slice(&packed);
    out
}

fn decode_calling_number(params: &mut AppMessage, data: &[u8]) {
    if data.len() < 2 {
        return;
    }
    let odd = data[0] & 0x80 != 0;
    let nature = data[0] & 0x7f;
    let ni = data[1] & 0x80 != 0;
    let plan = (data[1] >> 4) & 0x07;
    let presentation = (data[1] >> 2) & 0x03;
    let screening = data[1] & 0x03;
    params.add_param("CallingPartyNumber", &decode_digits(&data[2..], odd));
    params.add_param("CallingPartyNumber.nature", &name_of(NATURE_NAMES, nature));
    params.add_param("CallingPartyNumber.plan", &name_of(PLAN_NAMES, plan));
    params.add_param(
        "CallingPartyNumber.restrict",
        &name_of(PRESENTATION_NAMES, presentation),
    );
    params.add_param(
        "CallingPartyNumber.screened",
        &name_of(SCREENING_NAMES, screening),
    );
    params.add_param(
        "CallingPartyNumber.complete",
        if ni { "false" } else { "true" },
    );
}

fn encode_calling_number(params: &AppMessage) -> Option<Vec<u8>> {
    let digits = params.get_value("CallingPartyNumber")?;
    let nature = params
        .get_value("CallingPartyNumber.nature")
        .and_then(|n| value_of(NATURE_NAMES, n))
        .unwrap_or(3);
    let plan = params
        .get_value("CallingPartyNumber.plan")
        .and_then(|p| value_of(PLAN_NAMES, p))
        .unwrap_or(1);
    let presentation = params
        .get_value("CallingPartyNumber.restrict")
        .and_then(|p| value_of(PRESENTATION_NAMES, p))
        .unwrap_or(0);
    let screening = params
        .get_value("CallingPartyNumber.screened")
        .and_then(|s| value_of(SCREENING_NAMES, s))
        .unwrap_or(3);
    let ni = params.get_value("CallingPartyNumber.complete") == Some("false");
    let (packed, odd) = encode_digits(digits);
    let mut out = Vec::with_capacity(packed.len() + 2);
    out.push(nature & 0x7f | if odd { 0x80 } else { 0 });
    out.push(
        (plan & 0x07) << 4
            | (presentation & 0x03) << 2
            | (screening & 0x03)
            | if ni { 0x80 } else { 0 },
    );
    out.extend_from_slice(&packed);
    Some(out)
}

/// Optional parameter code for the calling party number.
const PARAM_CALLING_NUMBER: u8 = 0x0a;

fn hexify(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

fn unhexify(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

/// Decode the parameter area of an intercepted message into a typed
/// key-value map. Currently only IAM is understood.
pub fn decode_message(params: &mut AppMessage, msg_type: u8, data: &[u8]) -> bool {
    if msg_type != MSG_IAM {
        return false;
    }
    // IAM fixed mandatory part
    if data.len() < 7 {
        debug!("short IAM parameter area ({} bytes)", data.len());
        return false;
    }
    params.add_param("NatureOfConnectionIndicators", &data[0].to_string());
    params.add_param(
        "ForwardCallIndicators",
        &(u16::from(data[1]) | u16::from(data[2]) << 8).to_string(),
    );
    params.add_param("CallingPartyCategory", &data[3].to_string());
    params.add_param("TransmissionMediumRequirement", &data[4].to_string());
    // variable mandatory part: pointer to the called party number
    let p1 = data[5] as usize;
    let cdpn_pos = 5 + p1;
    if p1 == 0 || cdpn_pos >= data.len() {
        debug!("bad called number pointer in IAM");
        return false;
    }
    let cdpn_len = data[cdpn_pos] as usize;
    if cdpn_pos + 1 + cdpn_len > data.len() {
        debug!("truncated called number in IAM");
        return false;
    }
    decode_called_number(params, &data[cdpn_pos + 1..cdpn_pos + 1 + cdpn_len]);
    // optional part
    let p2 = data[6] as usize;
    if p2 == 0 {
        return true;
    }
    let mut pos = 6 + p2;
    while pos < data.len() {
        let code = data[pos];
        if code == 0 {
            break;
        }
        if pos + 1 >= data.len() {
            debug!("truncated optional parameter 0x{:02x} in IAM", code);
            return false;
        }
        let len = data[pos + 1] as usize;
        if pos + 2 + len > data.len() {
            debug!("truncated optional parameter 0x{:02x} in IAM", code);
            return false;
        }
        let value = &data[pos + 2..pos + 2 + len];
        match code {
            PARAM_CALLING_NUMBER => decode_calling_number(params, value),
            _ => params.add_param(&format!("Parameter_0x{:02x}", code), &hexify(value)),
        }
        pos += 2 + len;
    }
    true
}

/// Re-encode a parameter map back into a message parameter area.
pub fn encode_message(params: &AppMessage, msg_type: u8) -> Result<Vec<u8>> {
    if msg_type != MSG_IAM {
        return Err(Error::IsupError(format!(
            "cannot encode message type 0x{:02x}",
            msg_type
        )));
    }
    let mut out = Vec::with_capacity(32);
    out.push(params.get_int("NatureOfConnectionIndicators", 0) as u8);
    let fci = params.get_int("ForwardCallIndicators", 0) as u16;
    out.push((fci & 0xff) as u8);
    out.push((fci >> 8) as u8);
    out.push(params.get_int("CallingPartyCategory", 0) as u8);
    out.push(params.get_int("TransmissionMediumRequirement", 0) as u8);
    let cdpn = encode_called_number(params);
    let optional: Vec<(u8, Vec<u8>)> = {
        let mut opt = Vec::new();
        if let Some(cgpn) = encode_calling_number(params) {
            opt.push((PARAM_CALLING_NUMBER, cgpn));
        }
        for (name, value) in params.params() {
            if let Some(code) = name.strip_prefix("Parameter_0x") {
                if let (Ok(code), Some(bytes)) = (u8::from_str_radix(code, 16), unhexify(value)) {
                    opt.push((code, bytes));
                }
            }
        }
        opt
    };
    // pointer to the called number length byte, then the optional pointer
    out.push(2);
    if optional.is_empty() {
        out.push(0);
    } else {
        // from the pointer position past the variable part
        out.push((2 + cdpn.len()) as u8);
    }
    out.push(cdpn.len() as u8);
    out.extend_from_slice(&cdpn);
    if !optional.is_empty() {
        for (code, bytes) in &optional {
            out.push(*code);
            out.push(bytes.len() as u8);
            out.extend_from_slice(bytes);
        }
        out.push(0);
    }
    Ok(out)
}

/// Build a complete MSU for a mangled message: label, CIC, type and the
/// re-encoded parameter area.
pub fn create_msu(
    msg_type: u8,
    ssf: u8,
    label: &Ss7Label,
    cic: u16,
    params: &AppMessage,
) -> Result<Msu> {
    let body = encode_message(params, msg_type)?;
    let mut data = Vec::with_capacity(label.length() + 3 + body.len());
    label.write(&mut data);
    data.push((cic & 0xff) as u8);
    data.push((cic >> 8) as u8);
    data.push(msg_type);
    data.extend_from_slice(&body);
    Ok(Msu::new(ssf & 0xf0 | SIF_ISUP, data))
}
