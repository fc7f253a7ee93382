
use crate::auth;
use crate::message::{mark_incoming, PartyRef, SipMessage};
use crate::party::{SipParty, UserBackend};
use crate::transaction::{SipEngine, SipEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Credential store stub validating one user by recomputing the digest.
pub(crate) struct TestBackend {
    user: String,
    pass: String,
}

impl TestBackend {
    pub fn new(user: &str, pass: &str) -> Arc<Self> {
        Arc::new(TestBackend {
            user: user.to_string(),
            pass: pass.to_string(),
        })
    }
}

impl UserBackend for TestBackend {
    fn check_user(
        &self,
        username: &str,
        realm: &str,
        nonce: &str,
        method: &str,
        uri: &str,
        response: &str,
        _message: &SipMessage,
    ) -> bool {
        username == self.user
            && auth::build_digest(&self.user, realm, &self.pass, nonce, method, uri) == response
    }
}

pub(crate) fn as_party(party: &Arc<MockParty>) -> PartyRef {
    party.clone()
}

/// Transport stub recording transmitted messages.
pub(crate) struct MockParty {
    reliable: bool,
    pub sent: Mutex<Vec<Arc<SipMessage>>>,
}

impl MockParty {
    pub fn new(reliable: bool) -> Arc<Self> {
        Arc::new(MockParty {
            reliable,
            sent: Mutex::new(Vec::new()),
        })
    }
}

impl SipParty for MockParty {
    fn transmit(&self, event: &SipEvent) {
        self.sent.lock().unwrap().push(event.message.clone());
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
        5060
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

pub(crate) fn test_engine() -> SipEngine {
    SipEngine::builder().user_agent("telstack-test").build()
}

pub(crate) fn fast_engine() -> SipEngine {
    SipEngine::builder()
        .user_agent("telstack-test")
        .t1(Duration::from_millis(1))
        .t4(Duration::from_millis(10))
        .build()
}

/// Build an incoming answer to a transmitted request.
pub(crate) fn answer_to(request: &SipMessage, code: u16, to_tag: Option<&str>) -> SipMessage {
    let mut msg = SipMessage::answer(request, code, None);
    if let Some(tag) = to_tag {
        if let Some(to) = msg.header_mut("To") {
            to.set_param("tag", Some(tag));
        }
    }
    mark_incoming(&mut msg);
    msg
}

/// Drain every available event from the engine.
pub(crate) fn drain_events(engine: &SipEngine) -> Vec<SipEvent> {
    let mut events = Vec::new();
    while let Some(ev) = engine.get_event() {
        events.push(ev);
    }
    events
}
