//! SIP dialog identification.

use crate::message::SipMessage;

/// Identifies a SIP dialog: Call-ID plus both URIs and tags.
///
/// Two comparison modes exist: strict equality over all five fields for
/// RFC 2543 compatibility, and a URI-ignoring match (Call-ID and tags
/// only) for RFC 3261.
#[derive(Debug, Clone, Default)]
pub struct SipDialog {
    pub call_id: String,
    pub local_uri: String,
    pub local_tag: String,
    pub remote_uri: String,
    pub remote_tag: String,
}

impl SipDialog {
    pub fn new(call_id: &str) -> Self {
        SipDialog {
            call_id: call_id.to_string(),
            ..Default::default()
        }
    }

    /// Build the dialog key from a message, orienting local/remote by the
    /// message direction: From is the local side exactly when the message
    /// is an outgoing request or an incoming answer.
    pub fn from_message(msg: &SipMessage) -> Self {
        let from_is_local = msg.is_outgoing() != msg.is_answer();
        let from = msg.header("From");
        let to = msg.header("To");
        let (from_uri, from_tag) = from
            .map(|h| {
                (
                    h.addr().to_string(),
                    h.param_value("tag").unwrap_or("").to_string(),
                )
            })
            .unwrap_or_default();
        let (to_uri, to_tag) = to
            .map(|h| {
                (
                    h.addr().to_string(),
                    h.param_value("tag").unwrap_or("").to_string(),
                )
            })
            .unwrap_or_default();
        let call_id = msg.header_value("Call-ID").to_string();
        if from_is_local {
            SipDialog {
                call_id,
                local_uri: from_uri,
                local_tag: from_tag,
                remote_uri: to_uri,
                remote_tag: to_tag,
            }
        } else {
            SipDialog {
                call_id,
                local_uri: to_uri,
                local_tag: to_tag,
                remote_uri: from_uri,
                remote_tag: from_tag,
            }
        }
    }

    /// Dialog matching check. `ignore_uris` selects the RFC 3261 rule.
    pub fn matches(&self, other: &SipDialog, ignore_uris: bool) -> bool {
        self.call_id == other.call_id
            && self.local_tag == other.local_tag
            && self.remote_tag == other.remote_tag
            && (ignore_uris
                || (self.local_uri == other.local_uri && self.remote_uri == other.remote_uri))
    }
}

impl PartialEq for SipDialog {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other, false)
    }
}

impl std::fmt::Display for SipDialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}({}) {}({})",
            self.call_id, self.local_uri, self.local_tag, self.remote_uri, self.remote_tag
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SipMessage;

    fn invite(contact: &str) -> SipMessage {
        let buf = format!(
            "INVITE sip:bob@biloxi.example.com SIP/2.0\r\n\
             Via: SIP/2.0/UDP atlanta.example.com;branch=z9hG4bK74bf9\r\n\
             From: Alice <sip:alice@atlanta.example.com>;tag=9fxced76sl\r\n\
             To: Bob <sip:bob@biloxi.example.com>;tag=8321234356\r\n\
             Call-ID: 3848276298220188511@atlanta.example.com\r\n\
             Contact: <{}>\r\n\
             CSeq: 2 INVITE\r\n\r\n",
            contact
        );
        SipMessage::from_bytes(buf.as_bytes(), None).unwrap()
    }

    #[test]
    fn test_matching_modes() {
        let a = SipDialog::from_message(&invite("sip:alice@pc33.atlanta.example.com"));
        let mut b = SipDialog::from_message(&invite("sip:alice@pc34.atlanta.example.com"));
        assert!(a.matches(&b, false));
        assert!(a.matches(&b, true));
        // same dialog tags, different URIs: 3261 matches, 2543 does not
        b.remote_uri = "sip:bob@sphone.biloxi.example.com".to_string();
        assert!(!a.matches(&b, false));
        assert!(a.matches(&b, true));
        assert!(a != b);
    }

    #[test]
    fn test_orientation() {
        let msg = invite("sip:alice@pc33.atlanta.example.com");
        let dlg = SipDialog::from_message(&msg);
        // incoming request: From is the remote side
        assert_eq!(dlg.remote_tag, "9fxced76sl");
        assert_eq!(dlg.local_tag, "8321234356");
        assert_eq!(dlg.remote_uri, "sip:alice@atlanta.example.com");
    }
}
