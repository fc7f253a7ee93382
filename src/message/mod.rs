//! SIP message model: parsing, construction and completion.
//!
//! Messages are built or parsed once, completed with engine defaults, then
//! shared read-only behind an `Arc`. The transport endpoint is kept as a
//! weak back-reference so parties and messages never form ownership cycles.

use crate::auth;
use crate::party::SipParty;
use crate::transaction::engine::EngineInner;
use crate::transaction::{make_branch, random_text, CALL_ID_LEN, TO_TAG_LEN};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::{Arc, RwLock, Weak};
use tracing::debug;

#[cfg(test)]
mod tests;

pub type PartyRef = Arc<dyn SipParty>;

/// Per-message completion flags. Zero means engine defaults apply.
pub mod flags {
    pub const NOT_REQ_RPORT: u32 = 0x0001;
    pub const NOT_ADD_ALLOW: u32 = 0x0002;
    pub const NOT_ADD_AGENT: u32 = 0x0004;
    pub const RPORT_AFTER_BRANCH: u32 = 0x0008;
    pub const NOT_SET_RPORT: u32 = 0x0010;
    pub const NOT_SET_RECEIVED: u32 = 0x0020;
}

/// Compact header forms are expanded to their long names at parse time.
const COMPACT_FORMS: &[(&str, &str)] = &[
    ("i", "Call-ID"),
    ("m", "Contact"),
    ("e", "Content-Encoding"),
    ("l", "Content-Length"),
    ("c", "Content-Type"),
    ("f", "From"),
    ("s", "Subject"),
    ("k", "Supported"),
    ("t", "To"),
    ("v", "Via"),
    ("o", "Event"),
    ("r", "Refer-To"),
    ("b", "Referred-By"),
];

/// Headers whose parameters are comma separated auth-params instead of the
/// usual semicolon separated generic-params.
const AUTH_HEADERS: &[&str] = &[
    "WWW-Authenticate",
    "Proxy-Authenticate",
    "Authorization",
    "Proxy-Authorization",
];

fn expand_compact(name: &str) -> String {
    if name.len() == 1 {
        let lower = name.to_ascii_lowercase();
        for (short, long) in COMPACT_FORMS {
            if *short == lower {
                return (*long).to_string();
            }
        }
    }
    name.to_string()
}

fn is_auth_header(name: &str) -> bool {
    AUTH_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Split a header value on a separator at top level, honoring double
/// quotes and angle brackets.
fn split_unquoted(value: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut angle = 0i32;
    for c in value.chars() {
        match c {
            '"' => quoted = !quoted,
            '<' if !quoted => angle += 1,
            '>' if !quoted && angle > 0 => angle -= 1,
            _ => {}
        }
        if c == sep && !quoted && angle == 0 {
            parts.push(current.trim().to_string());
            current = String::new();
        } else {
            current.push(c);
        }
    }
    parts.push(current.trim().to_string());
    parts
}

/// Strip one layer of surrounding double quotes.
pub fn unquote(value: &str) -> &str {
    let v = value.trim();
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

/// A single header line: canonical name, main value and an ordered
/// parameter list. Parameter values are stored verbatim, quotes included.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderLine {
    pub name: String,
    pub value: String,
    pub params: Vec<(String, Option<String>)>,
    sep: char,
}

impl HeaderLine {
    pub fn new(name: &str, value: &str) -> Self {
        let name = expand_compact(name);
        let sep = if is_auth_header(&name) { ',' } else { ';' };
        let mut line = HeaderLine {
            name,
            value: String::new(),
            params: Vec::new(),
            sep,
        };
        line.assign(value);
        line
    }

    fn assign(&mut self, raw: &str) {
        if self.sep == ',' {
            // auth style: "Digest name=value, name=value"
            let raw = raw.trim();
            match raw.find(char::is_whitespace) {
                Some(pos) => {
                    self.value = raw[..pos].to_string();
                    for part in split_unquoted(raw[pos..].trim_start(), ',') {
                        if part.is_empty() {
                            continue;
                        }
                        match part.split_once('=') {
                            Some((n, v)) => self
                                .params
                                .push((n.trim().to_string(), Some(v.trim().to_string()))),
                            None => self.params.push((part, None)),
                        }
                    }
                }
                None => self.value = raw.to_string(),
            }
        } else {
            let mut parts = split_unquoted(raw, ';').into_iter();
            self.value = parts.next().unwrap_or_default();
            for part in parts {
                if part.is_empty() {
                    continue;
                }
                match part.split_once('=') {
                    Some((n, v)) => self
                        .params
                        .push((n.trim().to_string(), Some(v.trim().to_string()))),
                    None => self.params.push((part, None)),
                }
            }
        }
    }

    pub fn param(&self, name: &str) -> Option<&(String, Option<String>)> {
        self.params.iter().find(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Unquoted parameter value, empty string for valueless parameters.
    pub fn param_value(&self, name: &str) -> Option<&str> {
        self.param(name)
            .map(|(_, v)| v.as_deref().map(unquote).unwrap_or(""))
    }

    pub fn set_param(&mut self, name: &str, value: Option<&str>) {
        let value = value.map(|v| v.to_string());
        match self.params.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some((_, v)) => *v = value,
            None => self.params.push((name.to_string(), value)),
        }
    }

    pub fn del_param(&mut self, name: &str) {
        self.params.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// The value with any display name and angle brackets removed, e.g.
    /// `"Alice" <sip:alice@example.com>` becomes `sip:alice@example.com`.
    pub fn addr(&self) -> &str {
        match (self.value.find('<'), self.value.rfind('>')) {
            (Some(start), Some(end)) if start < end => &self.value[start + 1..end],
            _ => self.value.trim(),
        }
    }

    /// Serialize back to `value;name=param` form (or comma form for auth).
    pub fn to_value(&self) -> String {
        let mut out = self.value.clone();
        let mut first = true;
        for (n, v) in &self.params {
            if self.sep == ',' {
                out.push_str(if first { " " } else { ", " });
                first = false;
            } else {
                out.push(';');
            }
            out.push_str(n);
            if let Some(v) = v {
                out.push('=');
                out.push_str(v);
            }
        }
        out
    }
}

impl std::fmt::Display for HeaderLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.to_value())
    }
}

/// MIME body carried by a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Body {
    pub fn new(content_type: &str, data: Vec<u8>) -> Self {
        Body {
            content_type: content_type.to_string(),
            data,
        }
    }

    pub fn sdp(data: Vec<u8>) -> Self {
        Body::new("application/sdp", data)
    }

    pub fn is_sdp(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("application/sdp")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FirstLine {
    Request { method: String, uri: String },
    Response { code: u16, reason: String },
}

/// Default reason phrases for the codes the stack emits itself.
pub fn default_reason(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        183 => "Session Progress",
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        415 => "Unsupported Media Type",
        481 => "Call/Transaction Does Not Exist",
        486 => "Busy Here",
        487 => "Request Terminated",
        500 => "Server Internal Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown Reason",
    }
}

/// A parsed or constructed SIP message.
pub struct SipMessage {
    pub version: String,
    pub line: FirstLine,
    pub headers: Vec<HeaderLine>,
    pub body: Option<Body>,
    valid: bool,
    outgoing: bool,
    cseq: Option<u32>,
    flags_used: u32,
    auth_user: Option<String>,
    auth_pass: Option<String>,
    party: RwLock<Option<Weak<dyn SipParty>>>,
}

impl Clone for SipMessage {
    fn clone(&self) -> Self {
        SipMessage {
            version: self.version.clone(),
            line: self.line.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            valid: self.valid,
            outgoing: self.outgoing,
            cseq: self.cseq,
            flags_used: self.flags_used,
            auth_user: self.auth_user.clone(),
            auth_pass: self.auth_pass.clone(),
            party: RwLock::new(self.party.read().ok().and_then(|p| p.clone())),
        }
    }
}

impl std::fmt::Debug for SipMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SipMessage")
            .field("line", &self.line)
            .field("valid", &self.valid)
            .field("outgoing", &self.outgoing)
            .field("headers", &self.headers.len())
            .finish()
    }
}

impl SipMessage {
    fn empty(line: FirstLine, outgoing: bool) -> Self {
        SipMessage {
            version: "SIP/2.0".to_string(),
            line,
            headers: Vec::new(),
            body: None,
            valid: true,
            outgoing,
            cseq: None,
            flags_used: 0,
            auth_user: None,
            auth_pass: None,
            party: RwLock::new(None),
        }
    }

    /// Create a new, empty, outgoing request.
    pub fn new_request(method: &str, uri: &str) -> Self {
        SipMessage::empty(
            FirstLine::Request {
                method: method.to_ascii_uppercase(),
                uri: uri.to_string(),
            },
            true,
        )
    }

    /// Parse a message from a wire buffer received on a party.
    ///
    /// Returns `Err` only when the first line is not SIP at all. A message
    /// that parses structurally but misses mandatory headers comes back
    /// with `is_valid() == false` so the caller can answer 400.
    pub fn from_bytes(buf: &[u8], party: Option<&PartyRef>) -> Result<SipMessage> {
        let split = find_body_split(buf);
        let head = String::from_utf8_lossy(&buf[..split.0]);
        let mut lines = Vec::<String>::new();
        for raw in head.split("\r\n").flat_map(|l| l.split('\n')) {
            let raw = raw.trim_end_matches('\r');
            if raw.starts_with(' ') || raw.starts_with('\t') {
                // RFC 2822 folding: continuation joins the previous line
                if let Some(last) = lines.last_mut() {
                    last.push(' ');
                    last.push_str(raw.trim_start());
                    continue;
                }
            }
            if !raw.is_empty() {
                lines.push(raw.to_string());
            }
        }
        let mut iter = lines.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| Error::ParseError("empty buffer".into()))?;
        let (line, version) = parse_first_line(&first)?;
        let mut msg = SipMessage::empty(line, false);
        msg.version = version;
        for l in iter {
            match l.split_once(':') {
                Some((name, value)) => {
                    msg.headers.push(HeaderLine::new(name.trim(), value.trim()))
                }
                None => debug!("dropping malformed header line '{}'", l),
            }
        }
        if let Some(p) = party {
            msg.set_party(Some(p));
        }
        // body: Content-Length bounds it on stream transports, datagrams
        // take the remainder of the packet
        let raw_body = &buf[split.1..];
        let body_len = match msg.header_value("Content-Length").parse::<usize>() {
            Ok(n) if party.map(|p| p.is_reliable()).unwrap_or(false) => n.min(raw_body.len()),
            _ => raw_body.len(),
        };
        if body_len > 0 {
            let ctype = msg.header_value("Content-Type").to_string();
            let ctype = if ctype.is_empty() {
                "application/octet-stream".to_string()
            } else {
                ctype
            };
            msg.body = Some(Body::new(&ctype, raw_body[..body_len].to_vec()));
        }
        msg.cseq = msg
            .header("CSeq")
            .and_then(|h| h.value.split_whitespace().next())
            .and_then(|n| n.parse().ok());
        msg.valid = msg.cseq.is_some()
            && !msg.header_value("Call-ID").is_empty()
            && msg.header("From").is_some()
            && msg.header("To").is_some()
            && (msg.is_answer() || msg.header("Via").is_some());
        Ok(msg)
    }

    /// Create an answer to a request, copying the identifying headers.
    pub fn answer(request: &SipMessage, code: u16, reason: Option<&str>) -> SipMessage {
        let mut msg = SipMessage::empty(
            FirstLine::Response {
                code,
                reason: reason.unwrap_or(default_reason(code)).to_string(),
            },
            true,
        );
        msg.version = request.version.clone();
        for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
            msg.copy_all_headers(request, name, None);
        }
        msg.cseq = request.cseq;
        msg.set_party(request.party().as_ref());
        msg
    }

    /// Create an ACK for a final answer to an INVITE.
    ///
    /// For non-2xx the ACK belongs to the original transaction and reuses
    /// its branch; for 2xx it is a new transaction targeted at the remote
    /// contact, with the branch left for `complete` to generate.
    pub fn ack(original: &SipMessage, answer: &SipMessage) -> SipMessage {
        let success = matches!(answer.code(), Some(c) if (200..300).contains(&c));
        let uri = if success {
            answer
                .header("Contact")
                .map(|h| h.addr().to_string())
                .unwrap_or_else(|| original.uri().unwrap_or_default().to_string())
        } else {
            original.uri().unwrap_or_default().to_string()
        };
        let mut msg = SipMessage::new_request("ACK", &uri);
        msg.version = original.version.clone();
        if let Some(via) = original.header("Via") {
            let mut via = via.clone();
            if success {
                // 2xx ACK is a new transaction, complete() assigns a branch
                via.del_param("branch");
            }
            msg.headers.push(via);
        }
        msg.copy_header(original, "From", None);
        msg.copy_header(answer, "To", None);
        msg.copy_header(original, "Call-ID", None);
        msg.copy_header(original, "Max-Forwards", None);
        if let Some(cseq) = original.cseq {
            msg.headers
                .push(HeaderLine::new("CSeq", &format!("{} ACK", cseq)));
            msg.cseq = Some(cseq);
        }
        if success {
            msg.add_routes(&answer.get_routes());
        }
        msg.set_party(original.party().as_ref());
        msg
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_answer(&self) -> bool {
        matches!(self.line, FirstLine::Response { .. })
    }

    pub fn is_outgoing(&self) -> bool {
        self.outgoing
    }

    pub fn is_ack(&self) -> bool {
        matches!(&self.line, FirstLine::Request { method, .. } if method == "ACK")
    }

    pub fn is_reliable(&self) -> bool {
        self.party().map(|p| p.is_reliable()).unwrap_or(false)
    }

    pub fn method(&self) -> Option<&str> {
        match &self.line {
            FirstLine::Request { method, .. } => Some(method),
            FirstLine::Response { .. } => None,
        }
    }

    pub fn uri(&self) -> Option<&str> {
        match &self.line {
            FirstLine::Request { uri, .. } => Some(uri),
            FirstLine::Response { .. } => None,
        }
    }

    pub fn code(&self) -> Option<u16> {
        match &self.line {
            FirstLine::Response { code, .. } => Some(*code),
            FirstLine::Request { .. } => None,
        }
    }

    pub fn cseq(&self) -> Option<u32> {
        self.cseq
    }

    /// Method carried in the CSeq header, significant for answers.
    pub fn cseq_method(&self) -> &str {
        self.header("CSeq")
            .and_then(|h| h.value.split_whitespace().nth(1))
            .unwrap_or("")
    }

    pub fn get_flags(&self) -> u32 {
        self.flags_used
    }

    pub fn party(&self) -> Option<PartyRef> {
        self.party
            .read()
            .ok()
            .and_then(|p| p.as_ref().and_then(|w| w.upgrade()))
    }

    pub fn set_party(&self, party: Option<&PartyRef>) {
        if let Ok(mut slot) = self.party.write() {
            *slot = party.map(Arc::downgrade);
        }
    }

    /// Store credentials for automatic client transaction authentication.
    pub fn set_auto_auth(&mut self, username: &str, password: &str) {
        self.auth_user = Some(username.to_string());
        self.auth_pass = Some(password.to_string());
    }

    pub fn auth_credentials(&self) -> Option<(&str, &str)> {
        match (&self.auth_user, &self.auth_pass) {
            (Some(u), Some(p)) => Some((u, p)),
            _ => None,
        }
    }

    pub(crate) fn clear_auto_auth(&mut self) {
        self.auth_user = None;
        self.auth_pass = None;
    }

    /// Rewrite the CSeq number, keeping the method. Requests only.
    pub fn set_cseq(&mut self, seq: u32) {
        if let FirstLine::Request { method, .. } = &self.line {
            let method = method.clone();
            self.set_header("CSeq", &format!("{} {}", seq, method));
            self.cseq = Some(seq);
        }
    }

    pub fn header(&self, name: &str) -> Option<&HeaderLine> {
        self.headers.iter().find(|h| h.name.eq_ignore_ascii_case(name))
    }

    pub fn last_header(&self, name: &str) -> Option<&HeaderLine> {
        self.headers
            .iter()
            .rev()
            .find(|h| h.name.eq_ignore_ascii_case(name))
    }

    pub fn header_mut(&mut self, name: &str) -> Option<&mut HeaderLine> {
        self.headers
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(name))
    }

    pub fn count_headers(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .count()
    }

    /// Main value of the first (or last) header with this name, empty if
    /// the header is absent.
    pub fn header_value(&self, name: &str) -> &str {
        self.header(name).map(|h| h.value.as_str()).unwrap_or("")
    }

    pub fn get_param(&self, name: &str, param: &str, last: bool) -> Option<&str> {
        let line = if last {
            self.last_header(name)
        } else {
            self.header(name)
        };
        line.and_then(|h| h.param_value(param))
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push(HeaderLine::new(name, value));
    }

    pub fn clear_headers(&mut self, name: &str) {
        self.headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.clear_headers(name);
        self.add_header(name, value);
    }

    /// Copy the first header with this name from another message.
    pub fn copy_header(&mut self, from: &SipMessage, name: &str, new_name: Option<&str>) -> bool {
        match from.header(name) {
            Some(h) => {
                let mut h = h.clone();
                if let Some(n) = new_name {
                    h.name = n.to_string();
                }
                self.headers.push(h);
                true
            }
            None => false,
        }
    }

    /// Copy every header with this name, returning how many were copied.
    pub fn copy_all_headers(
        &mut self,
        from: &SipMessage,
        name: &str,
        new_name: Option<&str>,
    ) -> usize {
        let mut count = 0;
        for h in from
            .headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
        {
            let mut h = h.clone();
            if let Some(n) = new_name {
                h.name = n.to_string();
            }
            self.headers.push(h);
            count += 1;
        }
        count
    }

    /// Route set extracted from Record-Route headers, reversed so it can
    /// be used directly as the Route set of an in-dialog request sent by
    /// the original caller.
    pub fn get_routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self
            .headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case("Record-Route"))
            .flat_map(|h| split_unquoted(&h.to_value(), ','))
            .filter(|r| !r.is_empty())
            .collect();
        routes.reverse();
        routes
    }

    pub fn add_routes(&mut self, routes: &[String]) {
        for r in routes {
            self.add_header("Route", r);
        }
    }

    /// Fill in missing mandatory headers using engine defaults.
    ///
    /// `user`/`domain` override the From user and host, `dlg_tag` is set as
    /// the To tag of answers, `flags` overrides the engine completion flags.
    pub fn complete(
        &mut self,
        engine: &EngineInner,
        user: Option<&str>,
        domain: Option<&str>,
        dlg_tag: Option<&str>,
        flags: Option<u32>,
    ) {
        let flags = flags.unwrap_or(engine.flags);
        self.flags_used = flags;
        let party = self.party();
        let local_addr = party.as_ref().map(|p| p.local_addr()).unwrap_or_default();
        let local_port = party.as_ref().map(|p| p.local_port()).unwrap_or(0);
        let domain = domain
            .map(|d| d.to_string())
            .unwrap_or_else(|| host_port(&local_addr, local_port));

        if self.is_answer() {
            self.complete_answer_via(flags);
        } else {
            self.complete_request_via(flags, &local_addr, local_port);
        }

        if self.header("From").is_none() {
            let user = user.unwrap_or("anonymous");
            self.add_header("From", &format!("<sip:{}@{}>", user, domain));
        }
        if !self.is_answer() && !self.is_ack() {
            if let Some(from) = self.header_mut("From") {
                if from.param("tag").is_none() {
                    from.set_param("tag", Some(&random_text(TO_TAG_LEN)));
                }
            }
        }
        if self.header("To").is_none() {
            if let Some(uri) = self.uri() {
                let uri = uri.to_string();
                self.add_header("To", &format!("<{}>", uri));
            }
        }
        if let Some(tag) = dlg_tag {
            if !tag.is_empty() {
                if let Some(to) = self.header_mut("To") {
                    if to.param("tag").is_none() {
                        to.set_param("tag", Some(tag));
                    }
                }
            }
        }
        if self.header("Call-ID").is_none() {
            self.add_header(
                "Call-ID",
                &format!("{}@{}", random_text(CALL_ID_LEN), domain),
            );
        }
        if self.header("CSeq").is_none() {
            if let FirstLine::Request { method, .. } = &self.line {
                let seq = engine.next_cseq();
                let method = method.clone();
                self.add_header("CSeq", &format!("{} {}", seq, method));
                self.cseq = Some(seq);
            }
        }
        if !self.is_answer() && self.header("Max-Forwards").is_none() {
            self.add_header("Max-Forwards", &engine.max_forwards.to_string());
        }
        let add_contact = if self.is_answer() {
            matches!(self.code(), Some(c) if (200..300).contains(&c))
                && self.cseq_method() == "INVITE"
        } else {
            !self.is_ack()
        };
        if add_contact && self.header("Contact").is_none() && !local_addr.is_empty() {
            let user = user.unwrap_or("anonymous").to_string();
            self.add_header(
                "Contact",
                &format!("<sip:{}@{}>", user, host_port(&local_addr, local_port)),
            );
        }
        if (flags & flags::NOT_ADD_AGENT) == 0 && self.header("User-Agent").is_none() {
            self.add_header("User-Agent", &engine.user_agent);
        }
        if (flags & flags::NOT_ADD_ALLOW) == 0 && self.header("Allow").is_none() {
            let allowed = engine.get_allowed();
            if !allowed.is_empty() {
                self.add_header("Allow", &allowed);
            }
        }
    }

    fn complete_request_via(&mut self, flags: u32, local_addr: &str, local_port: u16) {
        let proto = self
            .party()
            .map(|p| p.proto_name())
            .unwrap_or("UDP");
        if self.header("Via").is_none() {
            self.add_header(
                "Via",
                &format!("SIP/2.0/{} {}", proto, host_port(local_addr, local_port)),
            );
        }
        let rport_first = (flags & flags::RPORT_AFTER_BRANCH) == 0;
        let want_rport = (flags & flags::NOT_REQ_RPORT) == 0 && !self.is_ack();
        if let Some(via) = self.header_mut("Via") {
            if rport_first && want_rport && via.param("rport").is_none() {
                via.set_param("rport", None);
            }
            if via.param("branch").is_none() {
                via.set_param("branch", Some(&make_branch()));
            }
            if !rport_first && want_rport && via.param("rport").is_none() {
                via.set_param("rport", None);
            }
        }
    }

    fn complete_answer_via(&mut self, flags: u32) {
        let party = self.party();
        let (addr, port) = match party {
            Some(p) => (p.party_addr(), p.party_port()),
            None => return,
        };
        if let Some(via) = self.header_mut("Via") {
            if (flags & flags::NOT_SET_RECEIVED) == 0 && via.param("received").is_none() {
                via.set_param("received", Some(&addr));
            }
            if (flags & flags::NOT_SET_RPORT) == 0 {
                if let Some((_, None)) = via.param("rport") {
                    via.set_param("rport", Some(&port.to_string()));
                }
            }
        }
    }

    /// Build an authorization line answering the digest challenge carried
    /// by this message.
    pub fn build_auth(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        proxy: bool,
    ) -> Option<HeaderLine> {
        let challenge = if proxy {
            self.header("Proxy-Authenticate")
        } else {
            self.header("WWW-Authenticate")
        }?;
        if !challenge.value.eq_ignore_ascii_case("Digest") {
            return None;
        }
        let realm = challenge.param_value("realm")?.to_string();
        let nonce = challenge.param_value("nonce")?.to_string();
        let response = auth::build_digest(username, &realm, password, &nonce, method, uri);
        let name = if proxy {
            "Proxy-Authorization"
        } else {
            "Authorization"
        };
        let mut line = HeaderLine::new(name, "Digest");
        line.set_param("username", Some(&format!("\"{}\"", username)));
        line.set_param("realm", Some(&format!("\"{}\"", realm)));
        line.set_param("nonce", Some(&format!("\"{}\"", nonce)));
        line.set_param("uri", Some(&format!("\"{}\"", uri)));
        line.set_param("response", Some(&format!("\"{}\"", response)));
        line.set_param("algorithm", Some("MD5"));
        Some(line)
    }

    /// Build an authorization line for retrying `original` after this
    /// challenge answer, using the credentials stored on the original.
    pub fn build_auth_for(&self, original: &SipMessage) -> Option<HeaderLine> {
        let (user, pass) = original.auth_credentials()?;
        let method = original.method()?.to_string();
        let uri = original.uri()?.to_string();
        let proxy = self.code() == Some(407);
        self.build_auth(user, pass, &method, &uri, proxy)
    }

    /// Serialize to the wire format. Content-Length is always emitted.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(256);
        match &self.line {
            FirstLine::Request { method, uri } => {
                out.extend_from_slice(format!("{} {} {}\r\n", method, uri, self.version).as_bytes())
            }
            FirstLine::Response { code, reason } => {
                out.extend_from_slice(format!("{} {} {}\r\n", self.version, code, reason).as_bytes())
            }
        }
        for h in &self.headers {
            if h.name.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            out.extend_from_slice(format!("{}\r\n", h).as_bytes());
        }
        let body_len = self.body.as_ref().map(|b| b.data.len()).unwrap_or(0);
        if let Some(body) = &self.body {
            if self.header("Content-Type").is_none() {
                out.extend_from_slice(format!("Content-Type: {}\r\n", body.content_type).as_bytes());
            }
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body_len).as_bytes());
        if let Some(body) = &self.body {
            out.extend_from_slice(&body.data);
        }
        Bytes::from(out)
    }
}

fn host_port(addr: &str, port: u16) -> String {
    if port == 0 || addr.is_empty() {
        addr.to_string()
    } else {
        format!("{}:{}", addr, port)
    }
}

/// Locate the blank line separating headers from body. Returns the end of
/// the header section and the start of the body.
fn find_body_split(buf: &[u8]) -> (usize, usize) {
    for i in 0..buf.len() {
        if buf[i..].starts_with(b"\r\n\r\n") {
            return (i, i + 4);
        }
        if buf[i..].starts_with(b"\n\n") {
            return (i, i + 2);
        }
    }
    (buf.len(), buf.len())
}

fn parse_first_line(line: &str) -> Result<(FirstLine, String)> {
    if let Some(rest) = line.strip_prefix("SIP/") {
        // response: SIP/2.0 CODE REASON
        let mut parts = rest.splitn(3, ' ');
        let version = format!("SIP/{}", parts.next().unwrap_or("2.0"));
        let code: u16 = parts
            .next()
            .and_then(|c| c.parse().ok())
            .filter(|c| (100..700).contains(c))
            .ok_or_else(|| Error::ParseError(format!("bad status line '{}'", line)))?;
        let reason = parts.next().unwrap_or("").to_string();
        Ok((FirstLine::Response { code, reason }, version))
    } else {
        // request: METHOD URI SIP/2.0
        let mut parts = line.split_whitespace();
        let method = parts
            .next()
            .filter(|m| !m.is_empty() && m.chars().all(|c| c.is_ascii_alphanumeric()))
            .ok_or_else(|| Error::ParseError(format!("bad request line '{}'", line)))?
            .to_ascii_uppercase();
        let uri = parts
            .next()
            .ok_or_else(|| Error::ParseError(format!("bad request line '{}'", line)))?
            .to_string();
        let version = parts
            .next()
            .filter(|v| v.starts_with("SIP/"))
            .ok_or_else(|| Error::ParseError(format!("bad request line '{}'", line)))?
            .to_string();
        Ok((FirstLine::Request { method, uri }, version))
    }
}

/// Mark a constructed message as incoming, used for synthetic answers the
/// engine generates on timeout.
pub(crate) fn mark_incoming(msg: &mut SipMessage) {
    msg.outgoing = false;
}
