
use crate::message::PartyRef;
use crate::message::SipMessage;
use crate::party::SipParty;
use crate::transaction::SipEvent;
use std::sync::{Arc, Mutex};

pub(crate) fn as_party(party: &Arc<TestParty>) -> PartyRef {
    party.clone()
}

/// Transport stub recording everything transmitted through it.
pub(crate) struct TestParty {
    pub reliable: bool,
    pub sent: Mutex<Vec<Arc<SipMessage>>>,
}

impl TestParty {
    pub fn new(reliable: bool) -> Arc<Self> {
        Arc::new(TestParty {
            reliable,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl SipParty for TestParty {
    fn transmit(&self, event: &SipEvent) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(event.message.clone());
        }
    }

    fn set_party(&self, _uri: &str) -> bool {
        true
    }

    fn local_addr(&self) -> String {
        "192.168.1.10".to_string()
    }

    fn local_port(&self) -> u16 {
        5060
    }

    fn party_addr(&self) -> String {
        "10.0.0.1".to_string()
    }

    fn party_port(&self) -> u16 {
        5062
    }

    fn proto_name(&self) -> &'static str {
        if self.reliable {
            "TCP"
        } else {
            "UDP"
        }
    }

    fn is_reliable(&self) -> bool {
        self.reliable
    }
}
