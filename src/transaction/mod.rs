//! SIP transaction layer: the engine owning the list of live transactions,
//! the per-transaction state machines and the events they emit.

use crate::message::SipMessage;
use std::sync::Arc;
use std::time::Duration;
use transaction::TxRef;

pub mod engine;
pub mod transaction;
pub use engine::{SipEngine, SipEngineBuilder};

#[cfg(test)]
mod tests;

/// RFC 3261 round-trip estimate.
pub const T1: Duration = Duration::from_millis(500);
/// Maximum retransmit interval.
pub const T2: Duration = Duration::from_secs(4);
/// Maximum lifetime of a message in the network.
pub const T4: Duration = Duration::from_secs(5);
/// Overall transaction deadline, 64*T1.
pub const T1X64: Duration = Duration::from_secs(32);
/// Default event pump poll interval for `serve`.
pub const TIMER_INTERVAL: Duration = Duration::from_millis(20);

pub const TO_TAG_LEN: usize = 8;
pub const BRANCH_LEN: usize = 12;
pub const CNONCE_LEN: usize = 8;
pub const CALL_ID_LEN: usize = 22;

/// The RFC 3261 branch cookie.
pub const BRANCH_MAGIC: &str = "z9hG4bK";

/// Transaction state.
///
/// * `Invalid` - before construction or after teardown
/// * `Initial` - initial message inserted, nothing transmitted yet
/// * `Trying` - message sent or received, no decision made
/// * `Process` - being processed locally or provisionally answered
/// * `Retrans` - retransmitting the latest message until acknowledged
/// * `Finish` - answering client retransmissions with the last message
/// * `Cleared` - removed from the engine, awaiting release
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Invalid,
    Initial,
    Trying,
    Process,
    Retrans,
    Finish,
    Cleared,
}

impl State {
    /// A transaction is active for the upper layer until it reaches Finish.
    pub fn is_active(&self) -> bool {
        *self > State::Invalid && *self < State::Finish
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Invalid => "Invalid",
            State::Initial => "Initial",
            State::Trying => "Trying",
            State::Process => "Process",
            State::Retrans => "Retrans",
            State::Finish => "Finish",
            State::Cleared => "Cleared",
        };
        write!(f, "{}", name)
    }
}

/// Result of offering a message to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Not matched at all.
    NoMatch,
    /// Belongs to another dialog, probably the result of a fork.
    NoDialog,
    /// Matched to this transaction and processed.
    Matched,
}

/// An event retrieved from the engine: a message, the transaction it
/// belongs to and the transaction state at the time of creation. Once the
/// transaction is past Finish the state serves as a post-mortem marker.
pub struct SipEvent {
    pub message: Arc<SipMessage>,
    pub transaction: Option<TxRef>,
    pub state: State,
}

impl SipEvent {
    pub fn is_outgoing(&self) -> bool {
        self.message.is_outgoing()
    }

    pub fn is_incoming(&self) -> bool {
        !self.message.is_outgoing()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn party(&self) -> Option<crate::message::PartyRef> {
        self.message.party()
    }
}

impl std::fmt::Debug for SipEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SipEvent")
            .field("message", &self.message)
            .field("state", &self.state)
            .finish()
    }
}

pub fn random_text(count: usize) -> String {
    use rand::Rng;
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(count)
        .map(char::from)
        .collect::<String>()
}

pub fn make_branch() -> String {
    format!("{}{}", BRANCH_MAGIC, random_text(BRANCH_LEN))
}

pub fn make_tag() -> String {
    random_text(TO_TAG_LEN)
}

pub fn make_call_id(domain: Option<&str>) -> String {
    format!("{}@{}", random_text(CALL_ID_LEN), domain.unwrap_or("localhost"))
}
