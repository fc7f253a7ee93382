//! External collaborator contracts: the transport endpoint, the application
//! message bus and the user store. Concrete UDP/TCP/SCTP transports and the
//! outer dispatcher live outside this crate.

use crate::message::SipMessage;
use crate::transaction::SipEvent;

/// One side of a transport association. Owned by the transport layer,
/// shared with messages through a weak back-reference.
///
/// `transmit` must not block: it enqueues the event's message for sending
/// and returns. Delivery failures surface only through retransmission.
pub trait SipParty: Send + Sync {
    fn transmit(&self, event: &SipEvent);

    /// Point this endpoint at a new remote taken from a SIP URI.
    /// Returns false if the URI cannot be resolved to an address.
    fn set_party(&self, uri: &str) -> bool;

    fn local_addr(&self) -> String;
    fn local_port(&self) -> u16;
    fn party_addr(&self) -> String;
    fn party_port(&self) -> u16;
    fn proto_name(&self) -> &'static str;
    fn is_reliable(&self) -> bool;
}

/// A named bag of string parameters exchanged with the host application.
/// Insertion order is preserved, duplicate names are allowed and the first
/// occurrence wins on lookup.
#[derive(Debug, Clone, Default)]
pub struct AppMessage {
    pub name: String,
    params: Vec<(String, String)>,
    pub body: Option<bytes::Bytes>,
}

impl AppMessage {
    pub fn new(name: &str) -> Self {
        AppMessage {
            name: name.to_string(),
            params: Vec::new(),
            body: None,
        }
    }

    pub fn add_param(&mut self, name: &str, value: &str) {
        self.params.push((name.to_string(), value.to_string()));
    }

    /// Replace the first parameter with this name, appending if absent.
    pub fn set_param(&mut self, name: &str, value: &str) {
        match self.params.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.add_param(name, value),
        }
    }

    pub fn clear_param(&mut self, name: &str) {
        self.params.retain(|(n, _)| n != name);
    }

    pub fn get_value(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_bool(&self, name: &str, defvalue: bool) -> bool {
        match self.get_value(name) {
            Some("yes") | Some("true") | Some("on") | Some("enable") => true,
            Some("no") | Some("false") | Some("off") | Some("disable") => false,
            _ => defvalue,
        }
    }

    pub fn get_int(&self, name: &str, defvalue: i64) -> i64 {
        self.get_value(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defvalue)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Append every parameter of another bag to this one.
    pub fn copy_params(&mut self, other: &AppMessage) {
        for (n, v) in other.params() {
            self.add_param(n, v);
        }
    }
}

/// Completion callback for asynchronously dispatched messages. Receives the
/// possibly mutated message and whether a handler accepted it.
pub type DispatchNotify = Box<dyn FnOnce(AppMessage, bool) + Send>;

/// The outer message fabric. `dispatch` handles a message synchronously,
/// mutating it in place with reply parameters; `enqueue` hands it off and
/// reports completion through the notify callback.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, msg: &mut AppMessage) -> bool;
    fn enqueue(&self, msg: AppMessage, notify: DispatchNotify) -> bool;
}

/// Credential validation backend for digest authentication.
pub trait UserBackend: Send + Sync {
    /// Validate a digest response for the given user. The backend computes
    /// (or looks up) the expected response and compares.
    #[allow(clippy::too_many_arguments)]
    fn check_user(
        &self,
        username: &str,
        realm: &str,
        nonce: &str,
        method: &str,
        uri: &str,
        response: &str,
        message: &SipMessage,
    ) -> bool;

    /// Authenticate by other means than user credentials, e.g. an address
    /// list. `no_user` is true when no plausible credentials were found.
    fn check_auth(&self, no_user: bool, message: &SipMessage) -> bool {
        let _ = (no_user, message);
        false
    }
}
