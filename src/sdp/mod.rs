//! SDP offer/answer engine: codec registry, per-media descriptors and the
//! per-dialog session state that builds and interprets SDP bodies.

pub mod media;
pub mod parser;
pub mod session;
pub use media::SdpMedia;
pub use session::{MediaStatus, SdpSession};

#[cfg(test)]
mod tests;

use crate::party::AppMessage;

/// Built-in codec registry: token, default static payload type and the
/// rtpmap encoding emitted for it. Dynamic overrides live per-media in the
/// mapping table.
pub struct CodecDef {
    pub token: &'static str,
    pub payload: i32,
    pub encoding: &'static str,
}

pub const PAYLOADS: &[CodecDef] = &[
    CodecDef { token: "mulaw", payload: 0, encoding: "PCMU/8000" },
    CodecDef { token: "alaw", payload: 8, encoding: "PCMA/8000" },
    CodecDef { token: "gsm", payload: 3, encoding: "GSM/8000" },
    CodecDef { token: "lpc10", payload: 7, encoding: "LPC/8000" },
    CodecDef { token: "slin", payload: 11, encoding: "L16/8000" },
    CodecDef { token: "g723", payload: 4, encoding: "G723/8000" },
    CodecDef { token: "g726", payload: 2, encoding: "G726-32/8000" },
    CodecDef { token: "g728", payload: 15, encoding: "G728/8000" },
    CodecDef { token: "g729", payload: 18, encoding: "G729/8000" },
    CodecDef { token: "ilbc20", payload: 98, encoding: "iLBC/8000" },
    CodecDef { token: "ilbc30", payload: 98, encoding: "iLBC/8000" },
    CodecDef { token: "amr", payload: 96, encoding: "AMR/8000" },
    CodecDef { token: "amr-o", payload: 96, encoding: "AMR/8000" },
    CodecDef { token: "h261", payload: 31, encoding: "H261/90000" },
    CodecDef { token: "h263", payload: 34, encoding: "H263/90000" },
    CodecDef { token: "mpv", payload: 32, encoding: "MPV/90000" },
];

/// Default static payload for a codec token.
pub fn static_payload(token: &str) -> Option<i32> {
    PAYLOADS
        .iter()
        .find(|c| c.token == token)
        .map(|c| c.payload)
}

/// rtpmap encoding keyed by the default payload of a token.
pub fn encoding_for_payload(payload: i32) -> Option<&'static str> {
    PAYLOADS
        .iter()
        .find(|c| c.payload == payload)
        .map(|c| c.encoding)
}

/// First token registered for a payload number.
pub fn token_for_payload(payload: i32) -> Option<&'static str> {
    PAYLOADS
        .iter()
        .find(|c| c.payload == payload)
        .map(|c| c.token)
}

/// Token for an rtpmap encoding, matched case-insensitively.
pub fn token_for_encoding(encoding: &str) -> Option<&'static str> {
    PAYLOADS
        .iter()
        .find(|c| c.encoding.eq_ignore_ascii_case(encoding))
        .map(|c| c.token)
}

/// Engine-level SDP configuration shared by every session.
pub struct SdpConfig {
    pub session_name: String,
    pub secure: bool,
    pub rfc2833: bool,
    pub sdp_forward: bool,
    pub ignore_port: bool,
    /// Enabled codec tokens in preference order.
    pub codecs: Vec<String>,
}

impl Default for SdpConfig {
    fn default() -> Self {
        SdpConfig {
            session_name: "SIP Call".to_string(),
            secure: false,
            rfc2833: true,
            sdp_forward: false,
            ignore_port: false,
            codecs: PAYLOADS.iter().map(|c| c.token.to_string()).collect(),
        }
    }
}

impl SdpConfig {
    pub fn codec_enabled(&self, token: &str) -> bool {
        self.codecs.iter().any(|c| c == token)
    }

    /// Comma separated default audio format list.
    pub fn audio_formats(&self) -> String {
        let audio: Vec<&str> = self
            .codecs
            .iter()
            .map(|c| c.as_str())
            .filter(|c| {
                static_payload(c)
                    .and_then(encoding_for_payload)
                    .map(|e| !e.ends_with("/90000"))
                    .unwrap_or(false)
            })
            .collect();
        audio.join(",")
    }

    /// Build a configuration from an application parameter bag.
    pub fn from_params(params: &AppMessage) -> Self {
        let mut cfg = SdpConfig::default();
        cfg.secure = params.get_bool("secure", cfg.secure);
        cfg.rfc2833 = params.get_bool("rfc2833", cfg.rfc2833);
        cfg.sdp_forward = params.get_bool("forward_sdp", cfg.sdp_forward);
        if let Some(codecs) = params.get_value("codecs") {
            cfg.codecs = codecs
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }
        cfg
    }
}
