mod test_answer;
mod test_offer;

use crate::party::{AppMessage, DispatchNotify, Dispatcher};
use crate::sdp::{SdpConfig, SdpSession};
use std::sync::{Arc, Mutex};

pub(crate) fn session() -> SdpSession {
    SdpSession::new(Arc::new(SdpConfig::default()))
}

pub(crate) fn secure_session() -> SdpSession {
    let cfg = SdpConfig {
        secure: true,
        ..SdpConfig::default()
    };
    SdpSession::new(Arc::new(cfg))
}

pub(crate) fn body_text(body: &crate::message::Body) -> String {
    String::from_utf8_lossy(&body.data).to_string()
}

/// RTP endpoint stub answering `chan.rtp` with a local address and port,
/// optionally with crypto material and opaque attributes.
pub(crate) struct MockRtp {
    pub seen: Mutex<Vec<AppMessage>>,
    pub reply: Vec<(String, String)>,
    pub accept: bool,
}

impl MockRtp {
    pub fn new() -> Arc<Self> {
        Arc::new(MockRtp {
            seen: Mutex::new(Vec::new()),
            reply: vec![
                ("localip".to_string(), "192.0.2.20".to_string()),
                ("localport".to_string(), "16384".to_string()),
            ],
            accept: true,
        })
    }

    pub fn with_reply(reply: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(MockRtp {
            seen: Mutex::new(Vec::new()),
            reply: reply
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            accept: true,
        })
    }
}

impl Dispatcher for MockRtp {
    fn dispatch(&self, msg: &mut AppMessage) -> bool {
        self.seen.lock().unwrap().push(msg.clone());
        if !self.accept {
            return false;
        }
        for (n, v) in &self.reply {
            msg.set_param(n, v);
        }
        true
    }

    fn enqueue(&self, mut msg: AppMessage, notify: DispatchNotify) -> bool {
        let ok = self.dispatch(&mut msg);
        notify(msg, ok);
        ok
    }
}
