//! The SIP engine: common defaults, the transaction list and the event
//! pump that drives every state machine.

use super::transaction::{extract_branch, SipTransaction, TxAction, TxRef};
use super::{Processed, SipEvent, State, T1, T4, TIMER_INTERVAL};
use crate::auth::NonceRegister;
use crate::message::{PartyRef, SipMessage};
use crate::party::UserBackend;
use crate::{Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "telstack/0.1";
const ALLOWED_DEFAULT: &[&str] = &["INVITE", "ACK", "CANCEL", "BYE", "OPTIONS", "REGISTER", "INFO"];

/// Engine defaults and shared helpers. Transactions keep a reference so
/// they can complete messages and read timer values without reaching back
/// into the engine itself.
pub struct EngineInner {
    pub user_agent: String,
    pub max_forwards: u32,
    pub flags: u32,
    pub lazy_trying: bool,
    pub t1: Duration,
    pub t4: Duration,
    allowed: Mutex<Vec<String>>,
    cseq: AtomicU32,
    nonce: Mutex<NonceRegister>,
    pub users: Option<Arc<dyn UserBackend>>,
}

pub type EngineInnerRef = Arc<EngineInner>;

impl EngineInner {
    /// CSeq value suitable for a new request.
    pub fn next_cseq(&self) -> u32 {
        self.cseq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Overall transaction deadline.
    pub fn t1x64(&self) -> Duration {
        self.t1 * 64
    }

    /// Timeout for transactions involving human interaction: the proxy
    /// INVITE timeout (timer C, 3 minutes) minus the response retransmit
    /// interval.
    pub fn user_timeout(&self) -> Duration {
        Duration::from_secs(180) - super::T2
    }

    /// Check a method against the allowed list. ACK and CANCEL always pass.
    pub fn is_allowed(&self, method: &str) -> bool {
        if method == "ACK" || method == "CANCEL" {
            return true;
        }
        self.allowed
            .lock()
            .map(|a| a.iter().any(|m| m == method))
            .unwrap_or(false)
    }

    pub fn add_allowed(&self, method: &str) {
        let method = method.to_ascii_uppercase();
        if let Ok(mut a) = self.allowed.lock() {
            if !a.iter().any(|m| *m == method) {
                a.push(method);
            }
        }
    }

    pub fn get_allowed(&self) -> String {
        self.allowed
            .lock()
            .map(|a| a.join(", "))
            .unwrap_or_default()
    }

    /// Current authentication nonce, re-issued when aged out.
    pub fn nonce_get(&self) -> String {
        self.nonce
            .lock()
            .map(|mut n| n.get())
            .unwrap_or_default()
    }

    /// Age of a nonce in seconds, negative for an invalid one.
    pub fn nonce_age(&self, nonce: &str) -> i64 {
        self.nonce.lock().map(|n| n.age(nonce)).unwrap_or(-1)
    }

    /// Walk the authorization lines of a request and validate them against
    /// the user backend. On success stores the user name and returns the
    /// nonce age so the caller can force re-authentication with stale=TRUE
    /// when the password matched but the nonce is too old.
    pub fn auth_user(&self, msg: &SipMessage, user: &mut String, proxy: bool) -> i64 {
        let header = if proxy {
            "Proxy-Authorization"
        } else {
            "Authorization"
        };
        let users = match &self.users {
            Some(u) => u,
            None => return -1,
        };
        let mut found_user = false;
        for line in msg
            .headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(header))
        {
            if !line.value.eq_ignore_ascii_case("Digest") {
                continue;
            }
            let username = match line.param_value("username") {
                Some(u) if !u.is_empty() => u.to_string(),
                _ => continue,
            };
            if !user.is_empty() && *user != username {
                continue;
            }
            found_user = true;
            let (realm, nonce, uri, response) = match (
                line.param_value("realm"),
                line.param_value("nonce"),
                line.param_value("uri"),
                line.param_value("response"),
            ) {
                (Some(r), Some(n), Some(u), Some(resp)) => (r, n, u, resp),
                _ => continue,
            };
            let age = self.nonce_age(nonce);
            if age < 0 {
                // not one of ours
                continue;
            }
            let method = msg.method().unwrap_or("");
            if users.check_user(&username, realm, nonce, method, uri, response, msg) {
                *user = username;
                return age;
            }
        }
        // fall through to non-password authenticators like address lists
        if users.check_auth(!found_user, msg) {
            return 0;
        }
        -1
    }
}

pub struct SipEngineBuilder {
    user_agent: String,
    max_forwards: u32,
    flags: u32,
    lazy_trying: bool,
    t1: Duration,
    t4: Duration,
    allowed: Vec<String>,
    nonce_secret: Option<String>,
    users: Option<Arc<dyn UserBackend>>,
    cancel_token: Option<CancellationToken>,
    timer_interval: Option<Duration>,
}

impl Default for SipEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SipEngineBuilder {
    pub fn new() -> Self {
        SipEngineBuilder {
            user_agent: USER_AGENT.to_string(),
            max_forwards: 70,
            flags: 0,
            lazy_trying: false,
            t1: T1,
            t4: T4,
            allowed: ALLOWED_DEFAULT.iter().map(|m| m.to_string()).collect(),
            nonce_secret: None,
            users: None,
            cancel_token: None,
            timer_interval: None,
        }
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn max_forwards(mut self, max_forwards: u32) -> Self {
        self.max_forwards = max_forwards;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn lazy_trying(mut self, lazy: bool) -> Self {
        self.lazy_trying = lazy;
        self
    }

    pub fn t1(mut self, t1: Duration) -> Self {
        self.t1 = t1;
        self
    }

    pub fn t4(mut self, t4: Duration) -> Self {
        self.t4 = t4;
        self
    }

    pub fn nonce_secret(mut self, secret: &str) -> Self {
        self.nonce_secret = Some(secret.to_string());
        self
    }

    pub fn user_backend(mut self, users: Arc<dyn UserBackend>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn timer_interval(mut self, interval: Duration) -> Self {
        self.timer_interval = Some(interval);
        self
    }

    pub fn build(self) -> SipEngine {
        let inner = Arc::new(EngineInner {
            user_agent: self.user_agent,
            max_forwards: self.max_forwards,
            flags: self.flags,
            lazy_trying: self.lazy_trying,
            t1: self.t1,
            t4: self.t4,
            allowed: Mutex::new(self.allowed),
            cseq: AtomicU32::new(rand::random::<u16>() as u32),
            nonce: Mutex::new(NonceRegister::new(self.nonce_secret.as_deref())),
            users: self.users,
        });
        SipEngine {
            inner,
            transactions: Mutex::new(Vec::new()),
            cancel_token: self.cancel_token.unwrap_or_default(),
            timer_interval: self.timer_interval.unwrap_or(TIMER_INTERVAL),
        }
    }
}

/// The transaction engine. Owns the list of live transactions under one
/// lock; individual transactions are shared with event consumers and are
/// locked after the list, never the other way around.
pub struct SipEngine {
    pub(crate) inner: EngineInnerRef,
    transactions: Mutex<Vec<TxRef>>,
    cancel_token: CancellationToken,
    timer_interval: Duration,
}

impl SipEngine {
    pub fn builder() -> SipEngineBuilder {
        SipEngineBuilder::new()
    }

    pub fn inner(&self) -> &EngineInnerRef {
        &self.inner
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Create a client transaction for an outgoing request. The message is
    /// completed with engine defaults before the branch is extracted.
    pub fn client_transaction(&self, msg: SipMessage) -> Result<TxRef> {
        if msg.is_answer() {
            return Err(Error::TransactionError(
                "client transactions start from requests".to_string(),
            ));
        }
        let mut list = self.lock_list();
        Ok(self.insert_client(&mut list, msg))
    }

    fn insert_client(&self, list: &mut Vec<TxRef>, mut msg: SipMessage) -> TxRef {
        msg.complete(&self.inner, None, None, None, None);
        let tx = SipTransaction::new_client(msg, self.inner.clone());
        let txref = Arc::new(Mutex::new(tx));
        list.push(txref.clone());
        txref
    }

    /// Parse a received buffer and feed it to the transaction list.
    pub fn add_message_bytes(&self, party: Option<&PartyRef>, buf: &[u8]) -> Option<TxRef> {
        match SipMessage::from_bytes(buf, party) {
            Ok(msg) => self.add_message(msg),
            Err(e) => {
                debug!("dropping unparseable message: {}", e);
                None
            }
        }
    }

    /// Match an incoming message against the transaction list, creating a
    /// server transaction for unmatched requests. Unmatched answers are
    /// dropped.
    pub fn add_message(&self, msg: SipMessage) -> Option<TxRef> {
        if msg.is_outgoing() {
            warn!("add_message is for incoming messages");
            return None;
        }
        let branch = extract_branch(&msg);
        let msg = Arc::new(msg);
        let mut list = self.lock_list();
        let mut matched: Option<(TxRef, TxAction)> = None;
        let mut fork_candidate = None;
        for tx in list.iter() {
            let (processed, action) = match tx.lock() {
                Ok(mut guard) => guard.process_message(&msg, &branch),
                Err(_) => continue,
            };
            match processed {
                Processed::Matched => {
                    matched = Some((tx.clone(), action));
                    break;
                }
                Processed::NoDialog => fork_candidate = Some(tx.clone()),
                Processed::NoMatch => {}
            }
        }
        if let Some((tx, action)) = matched {
            if let TxAction::NewClient(m) = action {
                self.insert_client(&mut list, m);
            }
            return Some(tx);
        }
        if let Some(orig) = fork_candidate {
            return self.fork_invite(&mut list, &msg, &branch, &orig);
        }
        if msg.is_answer() {
            debug!(
                "dropping unmatched answer {} to {}",
                msg.code().unwrap_or(0),
                msg.cseq_method()
            );
            return None;
        }
        if msg.is_ack() {
            debug!("dropping unmatched ACK");
            return None;
        }
        let mut tx = SipTransaction::new_server((*msg).clone(), self.inner.clone());
        if !msg.is_valid() {
            tx.set_response(400, None);
        } else if let Some(method) = msg.method() {
            if !self.inner.is_allowed(method) {
                tx.set_response(405, None);
            }
        }
        let txref = Arc::new(Mutex::new(tx));
        list.push(txref.clone());
        Some(txref)
    }

    /// A 2xx whose To tag differs from the dialog of an existing client
    /// INVITE transaction: create a sibling sharing the INVITE, carrying
    /// the new tag, and let it process the answer.
    fn fork_invite(
        &self,
        list: &mut Vec<TxRef>,
        msg: &Arc<SipMessage>,
        branch: &str,
        original: &TxRef,
    ) -> Option<TxRef> {
        let tag = msg.get_param("To", "tag", false).unwrap_or("").to_string();
        let tx = match original.lock() {
            Ok(orig) => SipTransaction::fork(&orig, &tag),
            Err(_) => return None,
        };
        info!("forked INVITE for dialog tag '{}'", tag);
        let txref = Arc::new(Mutex::new(tx));
        list.push(txref.clone());
        let action = match txref.lock() {
            Ok(mut guard) => guard.process_message(msg, branch).1,
            Err(_) => TxAction::None,
        };
        if let TxAction::NewClient(m) = action {
            self.insert_client(list, m);
        }
        Some(txref)
    }

    fn lock_list(&self) -> MutexGuard<'_, Vec<TxRef>> {
        match self.transactions.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Get one event from the transaction list: a pending application
    /// event first, else the next retransmit or state advance. Cleared
    /// transactions are pruned on the way.
    pub fn get_event(&self) -> Option<SipEvent> {
        let mut list = self.lock_list();
        for tx in list.iter() {
            if let Ok(mut guard) = tx.lock() {
                if let Some(mut ev) = guard.get_event(true) {
                    ev.transaction = Some(tx.clone());
                    return Some(ev);
                }
            }
        }
        list.retain(|tx| match tx.lock() {
            Ok(guard) => guard.state() != State::Cleared || guard.has_pending(),
            Err(_) => false,
        });
        for tx in list.iter() {
            if let Ok(mut guard) = tx.lock() {
                if let Some(mut ev) = guard.get_event(false) {
                    ev.transaction = Some(tx.clone());
                    return Some(ev);
                }
            }
        }
        None
    }

    /// Pump one event through the default handling. Returns false when
    /// nothing was handled so callers can idle.
    pub fn process(&self) -> bool {
        match self.get_event() {
            Some(ev) => {
                self.process_event(ev);
                true
            }
            None => false,
        }
    }

    /// Default event handling: transmit outgoing messages through their
    /// party. Incoming events are dropped here; applications that care
    /// drive `get_event` themselves.
    pub fn process_event(&self, event: SipEvent) {
        if event.is_outgoing() {
            match event.party() {
                Some(party) => party.transmit(&event),
                None => warn!("no party to transmit event"),
            }
        }
    }

    /// Drive the event pump until cancelled. Polls on a fixed interval so
    /// timers never need their own tasks.
    pub async fn serve(&self) {
        loop {
            while self.process() {}
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("engine cancelled");
                    break;
                }
                _ = tokio::time::sleep(self.timer_interval) => {}
            }
        }
        info!("engine shutdown");
    }

    pub fn shutdown(&self) {
        info!("engine shutdown requested");
        self.cancel_token.cancel();
    }
}
