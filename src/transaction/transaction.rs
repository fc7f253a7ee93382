//! Per-transaction state machines for client and server, INVITE and
//! non-INVITE transactions.

use super::engine::EngineInnerRef;
use super::{make_tag, Processed, SipEvent, State, BRANCH_MAGIC, T2};
use crate::auth;
use crate::message::{self, SipMessage};
use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub type TxRef = Arc<Mutex<SipTransaction>>;

/// Follow-up work a transaction asks the engine to perform while the
/// engine iterates its list: spawning a sibling client transaction for an
/// authentication retry or a 2xx ACK.
pub(crate) enum TxAction {
    None,
    NewClient(SipMessage),
}

/// Number of timer fires for the retransmission schedule: the delay starts
/// at T1 and doubles up to T2, the last fire is the timeout, and the total
/// comes out at 64*T1.
const RETRANS_REPS: u32 = 10;

pub struct SipTransaction {
    state: State,
    outgoing: bool,
    invite: bool,
    transmit: bool,
    first_message: Arc<SipMessage>,
    last_message: Option<Arc<SipMessage>>,
    pending: Option<SipEvent>,
    branch: String,
    call_id: String,
    tag: String,
    response: u16,
    timeout_at: Option<Instant>,
    reps: u32,
    delay: Duration,
    auth_tried: bool,
    user_data: Option<Arc<dyn Any + Send + Sync>>,
    inner: EngineInnerRef,
}

/// Top Via branch with the RFC 3261 cookie stripped; empty when the
/// cookie is missing, which forces RFC 2543 matching.
pub fn extract_branch(msg: &SipMessage) -> String {
    msg.get_param("Via", "branch", false)
        .and_then(|b| b.strip_prefix(BRANCH_MAGIC))
        .unwrap_or("")
        .to_string()
}

impl SipTransaction {
    fn new(message: SipMessage, inner: EngineInnerRef, outgoing: bool) -> Self {
        let branch = extract_branch(&message);
        let call_id = message.header_value("Call-ID").to_string();
        let tag = message
            .get_param("To", "tag", false)
            .unwrap_or("")
            .to_string();
        let invite = message.method() == Some("INVITE");
        SipTransaction {
            state: State::Initial,
            outgoing,
            invite,
            transmit: false,
            first_message: Arc::new(message),
            last_message: None,
            pending: None,
            branch,
            call_id,
            tag,
            response: 0,
            timeout_at: None,
            reps: 0,
            delay: Duration::ZERO,
            auth_tried: false,
            user_data: None,
            inner,
        }
    }

    /// Client transaction from a completed outgoing request.
    pub(crate) fn new_client(message: SipMessage, inner: EngineInnerRef) -> Self {
        Self::new(message, inner, true)
    }

    /// Server transaction from a received request.
    pub(crate) fn new_server(message: SipMessage, inner: EngineInnerRef) -> Self {
        Self::new(message, inner, false)
    }

    /// Sibling transaction for a forked INVITE: shares the original
    /// request and branch, carries the new dialog tag.
    pub(crate) fn fork(original: &SipTransaction, tag: &str) -> Self {
        let inner = original.inner.clone();
        let mut tx = SipTransaction {
            state: State::Process,
            outgoing: true,
            invite: true,
            transmit: false,
            first_message: original.first_message.clone(),
            last_message: None,
            pending: None,
            branch: original.branch.clone(),
            call_id: original.call_id.clone(),
            tag: tag.to_string(),
            response: 0,
            timeout_at: None,
            reps: 0,
            delay: Duration::ZERO,
            auth_tried: original.auth_tried,
            user_data: original.user_data.clone(),
            inner,
        };
        tx.set_timeout(tx.inner.user_timeout(), 1);
        tx
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_outgoing(&self) -> bool {
        self.outgoing
    }

    pub fn is_incoming(&self) -> bool {
        !self.outgoing
    }

    pub fn is_invite(&self) -> bool {
        self.invite
    }

    pub fn is_reliable(&self) -> bool {
        self.first_message.is_reliable()
    }

    pub fn initial_message(&self) -> Arc<SipMessage> {
        self.first_message.clone()
    }

    pub fn latest_message(&self) -> Option<Arc<SipMessage>> {
        self.last_message.clone()
    }

    pub fn method(&self) -> &str {
        self.first_message.method().unwrap_or("")
    }

    pub fn uri(&self) -> &str {
        self.first_message.uri().unwrap_or("")
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn dialog_tag(&self) -> &str {
        &self.tag
    }

    /// Set a new dialog tag, a random one when none is given.
    pub fn set_dialog_tag(&mut self, tag: Option<&str>) {
        self.tag = match tag {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => make_tag(),
        };
    }

    pub fn response_code(&self) -> u16 {
        self.response
    }

    pub fn set_user_data(&mut self, data: Option<Arc<dyn Any + Send + Sync>>) {
        self.user_data = data;
    }

    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.user_data.clone()
    }

    /// Allow the latest outgoing message to be (re)sent over the wire.
    pub fn set_transmit(&mut self) {
        self.transmit = true;
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn set_timeout(&mut self, delay: Duration, count: u32) {
        self.delay = delay;
        self.reps = count;
        self.timeout_at = Some(Instant::now() + delay);
    }

    fn clear_timeout(&mut self) {
        self.timeout_at = None;
        self.reps = 0;
    }

    fn change_state(&mut self, new_state: State) -> bool {
        if self.state == new_state {
            return false;
        }
        trace!(
            "transaction {}/{} transition: {} -> {}",
            self.method(),
            self.branch,
            self.state,
            new_state
        );
        self.state = new_state;
        if new_state == State::Cleared {
            self.clear_timeout();
            self.transmit = false;
        }
        true
    }

    fn event_with(&self, message: Arc<SipMessage>) -> SipEvent {
        SipEvent {
            message,
            transaction: None,
            state: self.state,
        }
    }

    fn set_pending(&mut self, message: Arc<SipMessage>) {
        let ev = self.event_with(message);
        if self.pending.is_some() {
            debug!("replacing pending event of {}/{}", self.method(), self.branch);
        }
        self.pending = Some(ev);
    }

    /// Check whether a message belongs to this transaction and process it.
    /// `branch` is the cookie-stripped top Via branch of the message.
    pub(crate) fn process_message(
        &mut self,
        msg: &Arc<SipMessage>,
        branch: &str,
    ) -> (Processed, TxAction) {
        if self.state == State::Invalid || self.state == State::Cleared {
            return (Processed::NoMatch, TxAction::None);
        }
        // direction: client transactions take answers, server ones requests
        if msg.is_answer() != self.outgoing {
            return (Processed::NoMatch, TxAction::None);
        }
        let matched = if !branch.is_empty() && !self.branch.is_empty() {
            if branch == self.branch {
                if msg.is_answer() {
                    msg.cseq_method() == self.method()
                } else {
                    msg.method() == Some(self.method()) || (msg.is_ack() && self.invite)
                }
            } else {
                // a different cookie branch can only be the ACK for a 2xx,
                // which is its own transaction on the wire but must land on
                // the INVITE that answered; anything else is not ours
                msg.is_ack()
                    && self.invite
                    && !self.outgoing
                    && !self.tag.is_empty()
                    && msg.get_param("To", "tag", false).unwrap_or("") == self.tag
                    && msg.header_value("Call-ID") == self.call_id
                    && msg.cseq() == self.first_message.cseq()
            }
        } else {
            self.matches_rfc2543(msg)
        };
        if !matched {
            return (Processed::NoMatch, TxAction::None);
        }
        // a 2xx with a different To tag opens another dialog on the same
        // INVITE: let the engine fork a sibling
        if self.outgoing && self.invite {
            if let Some(code) = msg.code() {
                let to_tag = msg.get_param("To", "tag", false).unwrap_or("");
                if (200..300).contains(&code)
                    && !self.tag.is_empty()
                    && !to_tag.is_empty()
                    && to_tag != self.tag
                {
                    return (Processed::NoDialog, TxAction::None);
                }
            }
        }
        let action = if msg.is_answer() {
            self.process_answer(msg)
        } else {
            self.process_request(msg)
        };
        (Processed::Matched, action)
    }

    /// RFC 2543 compatibility matching for messages without a cookie
    /// branch: request-URI/From/To/Call-ID/CSeq/top-Via for requests,
    /// From/To/Call-ID/CSeq for answers.
    fn matches_rfc2543(&self, msg: &SipMessage) -> bool {
        if msg.header_value("Call-ID") != self.call_id {
            return false;
        }
        if msg.cseq() != self.first_message.cseq() {
            return false;
        }
        let from_match = addr_of(msg, "From") == addr_of(&self.first_message, "From")
            && tag_of(msg, "From") == tag_of(&self.first_message, "From");
        let to_match = addr_of(msg, "To") == addr_of(&self.first_message, "To");
        if msg.is_answer() {
            msg.cseq_method() == self.method() && from_match && to_match
        } else if msg.is_ack() && self.invite && !self.outgoing {
            // the ACK for a 2xx is a new transaction on the wire but must
            // land on the INVITE transaction that answered
            from_match && to_match && msg.get_param("To", "tag", false).unwrap_or("") == self.tag
        } else {
            msg.method() == Some(self.method())
                && msg.uri() == self.first_message.uri()
                && msg.header_value("Via") == self.first_message.header_value("Via")
                && from_match
                && to_match
        }
    }

    fn process_answer(&mut self, msg: &Arc<SipMessage>) -> TxAction {
        let code = match msg.code() {
            Some(c) => c,
            None => return TxAction::None,
        };
        match self.state {
            State::Initial | State::Trying => {
                if code < 200 {
                    if code >= 100 {
                        self.change_state(State::Process);
                        self.set_timeout(self.process_timeout(), 1);
                        self.set_pending(msg.clone());
                    }
                    TxAction::None
                } else {
                    self.final_answer(msg, code)
                }
            }
            State::Process => {
                if code < 200 {
                    // provisional update, refresh the deadline
                    self.set_timeout(self.process_timeout(), 1);
                    self.set_pending(msg.clone());
                    TxAction::None
                } else {
                    self.final_answer(msg, code)
                }
            }
            State::Retrans => {
                // retransmitted final: resend the ACK held by this
                // transaction, 2xx retransmissions are absorbed
                if self.invite && code >= 300 && self.last_message.is_some() {
                    self.transmit = true;
                }
                TxAction::None
            }
            _ => TxAction::None,
        }
    }

    fn process_timeout(&self) -> Duration {
        if self.invite {
            self.inner.user_timeout()
        } else {
            self.inner.t1x64()
        }
    }

    fn final_answer(&mut self, msg: &Arc<SipMessage>, code: u16) -> TxAction {
        self.response = code;
        if self.tag.is_empty() {
            if let Some(tag) = msg.get_param("To", "tag", false) {
                self.tag = tag.to_string();
            }
        }
        if let Some(action) = self.try_auto_auth(msg, code) {
            return action;
        }
        if !self.invite {
            self.change_state(State::Finish);
            self.set_timeout(self.inner.t4, 1);
            self.set_pending(msg.clone());
            return TxAction::None;
        }
        if code >= 300 {
            // ACK inside this transaction, same branch and CSeq number
            let mut ack = SipMessage::ack(&self.first_message, msg);
            ack.complete(&self.inner, None, None, None, None);
            self.last_message = Some(Arc::new(ack));
            self.transmit = true;
            self.change_state(State::Retrans);
            let wait = if self.is_reliable() {
                self.inner.t4
            } else {
                self.inner.t1x64()
            };
            self.set_timeout(wait, 1);
            self.set_pending(msg.clone());
            TxAction::None
        } else {
            // 2xx: the ACK is a new transaction with its own branch
            let ack = SipMessage::ack(&self.first_message, msg);
            self.change_state(State::Retrans);
            self.set_timeout(self.inner.t1x64(), 1);
            self.set_pending(msg.clone());
            TxAction::NewClient(ack)
        }
    }

    /// Automatic client authentication: on a 401/407 challenge, if the
    /// original request carries credentials, hand the engine a retried
    /// request with a fresh branch, a bumped CSeq and an authorization
    /// line. One retry per transaction.
    fn try_auto_auth(&mut self, msg: &Arc<SipMessage>, code: u16) -> Option<TxAction> {
        if (code != 401 && code != 407) || self.auth_tried {
            return None;
        }
        self.first_message.auth_credentials()?;
        let line = msg.build_auth_for(&self.first_message)?;
        self.auth_tried = true;
        let mut retry = (*self.first_message).clone();
        retry.clear_headers("Authorization");
        retry.clear_headers("Proxy-Authorization");
        retry.headers.push(line);
        retry.set_cseq(self.first_message.cseq().unwrap_or(0) + 1);
        if let Some(via) = retry.header_mut("Via") {
            via.del_param("branch");
        }
        // credentials are not carried over, so a second challenge fails
        // through to the application instead of looping
        retry.clear_auto_auth();
        debug!(
            "retrying {} with authorization after {}",
            self.method(),
            code
        );
        self.change_state(State::Finish);
        self.set_timeout(self.inner.t4, 1);
        Some(TxAction::NewClient(retry))
    }

    fn process_request(&mut self, msg: &Arc<SipMessage>) -> TxAction {
        match self.state {
            State::Initial | State::Trying | State::Process => {
                // request retransmission: repeat whatever we sent last
                if self.last_message.is_some() {
                    self.transmit = true;
                }
            }
            State::Retrans | State::Finish => {
                if msg.is_ack() && self.invite {
                    self.change_state(State::Cleared);
                    self.pending = Some(self.event_with(msg.clone()));
                } else if self.last_message.is_some() {
                    // each retransmit of the request gets exactly one
                    // retransmit of the last response
                    self.transmit = true;
                }
            }
            _ => {}
        }
        TxAction::None
    }

    /// Retrieve the next event of this transaction, if any. With
    /// `pending_only` set, only a stored application event is returned.
    pub(crate) fn get_event(&mut self, pending_only: bool) -> Option<SipEvent> {
        if let Some(ev) = self.pending.take() {
            return Some(ev);
        }
        if self.state == State::Invalid || self.state == State::Cleared {
            return None;
        }
        if pending_only {
            return None;
        }
        if self.transmit {
            self.transmit = false;
            let msg = self
                .last_message
                .clone()
                .unwrap_or_else(|| self.first_message.clone());
            return Some(self.event_with(msg));
        }
        let fired = match self.timeout_at {
            Some(at) if at <= Instant::now() => {
                self.timeout_at = None;
                self.reps = self.reps.saturating_sub(1);
                Some(self.reps)
            }
            _ => None,
        };
        if self.outgoing {
            self.client_event(fired)
        } else {
            self.server_event(fired)
        }
    }

    fn client_event(&mut self, fired: Option<u32>) -> Option<SipEvent> {
        match self.state {
            State::Initial => {
                // first transmission of the request
                if self.first_message.is_ack() {
                    // stateless ACK: one transmit, then gone
                    self.change_state(State::Cleared);
                    let ev = SipEvent {
                        message: self.first_message.clone(),
                        transaction: None,
                        state: State::Cleared,
                    };
                    return Some(ev);
                }
                self.change_state(State::Trying);
                if self.is_reliable() {
                    self.set_timeout(self.inner.t1x64(), 1);
                } else {
                    self.set_timeout(self.inner.t1, RETRANS_REPS);
                }
                Some(self.event_with(self.first_message.clone()))
            }
            State::Trying => match fired {
                Some(left) if left > 0 => {
                    // retransmit, doubling up to T2
                    self.delay = (self.delay * 2).min(T2);
                    self.timeout_at = Some(Instant::now() + self.delay);
                    Some(self.event_with(self.first_message.clone()))
                }
                Some(_) => self.timeout_terminate(),
                None => None,
            },
            State::Process => match fired {
                Some(0) => self.timeout_terminate(),
                _ => None,
            },
            State::Retrans => match fired {
                Some(0) => {
                    self.change_state(State::Finish);
                    self.set_timeout(self.inner.t4, 1);
                    None
                }
                _ => None,
            },
            State::Finish => match fired {
                Some(0) => {
                    self.change_state(State::Cleared);
                    None
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// No answer in time: emit a synthetic 408 so the consumer sees a
    /// terminal event, then wind the transaction down.
    fn timeout_terminate(&mut self) -> Option<SipEvent> {
        warn!("timeout of {}/{}", self.method(), self.branch);
        self.response = 408;
        let mut timeout = SipMessage::answer(&self.first_message, 408, None);
        message::mark_incoming(&mut timeout);
        self.change_state(State::Finish);
        self.set_timeout(self.inner.t4, 1);
        Some(self.event_with(Arc::new(timeout)))
    }

    fn server_event(&mut self, fired: Option<u32>) -> Option<SipEvent> {
        match self.state {
            State::Initial => {
                self.change_state(State::Trying);
                if self.invite || !self.inner.lazy_trying {
                    let mut trying = SipMessage::answer(&self.first_message, 100, None);
                    trying.complete(&self.inner, None, None, None, None);
                    self.response = 100;
                    self.last_message = Some(Arc::new(trying));
                    let msg = self.last_message.clone()?;
                    return Some(self.event_with(msg));
                }
                self.server_event(None)
            }
            State::Trying => {
                // hand the request to the application
                self.change_state(State::Process);
                self.set_timeout(self.process_timeout(), 1);
                Some(self.event_with(self.first_message.clone()))
            }
            State::Process => match fired {
                Some(0) => {
                    // the application never answered
                    self.set_response(408, None);
                    self.transmit = false;
                    self.last_message
                        .clone()
                        .map(|msg| self.event_with(msg))
                }
                _ => None,
            },
            State::Retrans => match fired {
                Some(left) if left > 0 => {
                    // INVITE final response retransmission until ACK
                    self.delay = (self.delay * 2).min(T2);
                    self.timeout_at = Some(Instant::now() + self.delay);
                    self.last_message
                        .clone()
                        .map(|msg| self.event_with(msg))
                }
                Some(_) => {
                    self.change_state(State::Finish);
                    let wait = if self.invite {
                        self.inner.t1x64()
                    } else {
                        self.inner.t4
                    };
                    self.set_timeout(wait, 1);
                    None
                }
                None => None,
            },
            State::Finish => match fired {
                Some(0) => {
                    self.change_state(State::Cleared);
                    None
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Build and queue a final (or provisional) response. Server side only.
    pub fn set_response(&mut self, code: u16, reason: Option<&str>) -> bool {
        if self.outgoing || self.first_message.is_ack() {
            return false;
        }
        let mut msg = SipMessage::answer(&self.first_message, code, reason);
        if code > 100 && self.tag.is_empty() {
            self.tag = make_tag();
        }
        let tag = self.tag.clone();
        msg.complete(&self.inner, None, None, Some(&tag), None);
        self.set_response_message(msg)
    }

    /// Queue an already built response message for transmission.
    pub fn set_response_message(&mut self, msg: SipMessage) -> bool {
        if self.outgoing {
            return false;
        }
        let code = match msg.code() {
            Some(c) => c,
            None => return false,
        };
        match self.state {
            State::Initial | State::Trying | State::Process => {}
            _ => return false,
        }
        self.response = code;
        self.last_message = Some(Arc::new(msg));
        self.transmit = true;
        if code >= 200 {
            self.change_state(State::Retrans);
            if self.invite && !self.is_reliable() {
                self.set_timeout(self.inner.t1, RETRANS_REPS);
            } else if self.invite {
                self.set_timeout(self.inner.t1x64(), 1);
            } else if self.is_reliable() {
                self.set_timeout(self.inner.t4, 1);
            } else {
                self.set_timeout(self.inner.t1x64(), 1);
            }
        } else if self.state != State::Process {
            self.change_state(State::Process);
            self.set_timeout(self.process_timeout(), 1);
        }
        true
    }

    /// Send back an authentication required answer with a fresh challenge.
    pub fn request_auth(&mut self, realm: &str, domain: &str, stale: bool, proxy: bool) -> bool {
        if self.outgoing || self.first_message.is_ack() {
            return false;
        }
        let code = if proxy { 407 } else { 401 };
        let nonce = self.inner.nonce_get();
        let mut msg = SipMessage::answer(&self.first_message, code, None);
        msg.headers
            .push(auth::challenge(&nonce, realm, domain, stale, proxy));
        if self.tag.is_empty() {
            self.tag = make_tag();
        }
        let tag = self.tag.clone();
        msg.complete(&self.inner, None, None, Some(&tag), None);
        self.set_response_message(msg)
    }

    /// Detect the proper credentials for any user known to the backend.
    /// Returns the nonce age on success, negative on failure.
    pub fn auth_user(&self, user: &mut String, proxy: bool) -> i64 {
        self.inner.auth_user(&self.first_message, user, proxy)
    }
}

fn addr_of<'a>(msg: &'a SipMessage, name: &str) -> &'a str {
    msg.header(name).map(|h| h.addr()).unwrap_or("")
}

fn tag_of<'a>(msg: &'a SipMessage, name: &str) -> &'a str {
    msg.header(name)
        .and_then(|h| h.param_value("tag"))
        .unwrap_or("")
}
