//! SDP text parsing: session address, media lines, rtpmap/fmtp resolution
//! and SDES pickup.

use super::{token_for_encoding, token_for_payload, SdpConfig, SdpMedia};
use std::collections::HashMap;
use tracing::debug;

struct MediaSection {
    name: String,
    port: u16,
    transport: String,
    payloads: Vec<i32>,
    rtpmap: HashMap<i32, String>,
    fmtp: HashMap<i32, String>,
    crypto: String,
    attrs: Vec<(String, String)>,
}

/// Parse an SDP body into the session-level connection address and a media
/// list. Formats are intersected against the configured codecs; dynamic
/// payload numbers land in the per-media mapping table.
pub fn parse_sdp(config: &SdpConfig, text: &str) -> Option<(String, Vec<SdpMedia>)> {
    let mut session_addr = String::new();
    let mut sections: Vec<MediaSection> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        let (key, value) = match line.split_once('=') {
            Some((k, v)) if k.len() == 1 => (k, v.trim()),
            _ => continue,
        };
        match key {
            "c" => {
                // c=IN IP4 <addr>, media level lines override the session
                let addr = value.split_whitespace().nth(2).unwrap_or("");
                if !addr.is_empty() {
                    session_addr = addr.to_string();
                }
            }
            "m" => {
                // m=<name> <port> <transport> <fmt list>
                let mut it = value.split_whitespace();
                let name = it.next().unwrap_or("").to_string();
                let port: u16 = it.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                let transport = it.next().unwrap_or("RTP/AVP").to_string();
                let payloads = it.filter_map(|p| p.parse().ok()).collect();
                sections.push(MediaSection {
                    name,
                    port,
                    transport,
                    payloads,
                    rtpmap: HashMap::new(),
                    fmtp: HashMap::new(),
                    crypto: String::new(),
                    attrs: Vec::new(),
                });
            }
            "a" => {
                let section = match sections.last_mut() {
                    Some(s) => s,
                    None => continue,
                };
                let (aname, avalue) = match value.split_once(':') {
                    Some((n, v)) => (n, v),
                    None => (value, ""),
                };
                match aname {
                    "rtpmap" => {
                        if let Some((pt, enc)) = avalue.split_once(' ') {
                            if let Ok(pt) = pt.trim().parse() {
                                section.rtpmap.insert(pt, enc.trim().to_string());
                            }
                        }
                    }
                    "fmtp" => {
                        if let Some((pt, rest)) = avalue.split_once(' ') {
                            if let Ok(pt) = pt.trim().parse() {
                                section.fmtp.insert(pt, rest.trim().to_string());
                            }
                        }
                    }
                    "crypto" => {
                        if section.crypto.is_empty() {
                            section.crypto = avalue.trim().to_string();
                        }
                    }
                    _ => section
                        .attrs
                        .push((aname.to_string(), avalue.trim().to_string())),
                }
            }
            _ => {}
        }
    }
    if session_addr.is_empty() && sections.is_empty() {
        return None;
    }
    let media = sections
        .into_iter()
        .map(|s| resolve_section(config, s))
        .collect();
    Some((session_addr, media))
}

fn resolve_section(config: &SdpConfig, section: MediaSection) -> SdpMedia {
    let mut formats: Vec<String> = Vec::new();
    let mut mappings: Vec<(String, i32)> = Vec::new();
    let mut rfc2833 = -1;
    for pt in &section.payloads {
        let token = match section.rtpmap.get(pt) {
            Some(enc) => {
                let base = enc.splitn(3, '/').take(2).collect::<Vec<_>>().join("/");
                if base.to_ascii_lowercase().starts_with("telephone-event") {
                    rfc2833 = *pt;
                    continue;
                }
                match token_for_encoding(&base) {
                    Some(t) => t,
                    None => {
                        debug!("unknown encoding '{}' for payload {}", enc, pt);
                        continue;
                    }
                }
            }
            None => match token_for_payload(*pt) {
                // static payload without an rtpmap line
                Some(t) => t,
                None => {
                    debug!("unmapped payload {} in media '{}'", pt, section.name);
                    continue;
                }
            },
        };
        let token = refine_token(token, &section, *pt);
        push_format(config, &mut formats, &mut mappings, &token, *pt);
        if token == "g729" {
            if let Some(fmtp) = section.fmtp.get(pt) {
                if fmtp.contains("annexb=yes") {
                    push_format(config, &mut formats, &mut mappings, "g729b", *pt);
                }
            }
        }
    }
    let mut media = SdpMedia::new(&section.name, &section.transport, &formats.join(","));
    media.set_remote_port(section.port);
    media.set_rfc2833(rfc2833);
    for (t, p) in mappings {
        media.add_mapping(&t, p);
    }
    if !section.crypto.is_empty() {
        media.crypto(&section.crypto, true);
    }
    for (n, v) in section.attrs {
        media.parameter(&n, &v, true);
    }
    media.set_local_changed(false);
    media
}

/// Tokens sharing a payload are told apart through fmtp: iLBC frame mode
/// and AMR octet alignment.
fn refine_token(token: &str, section: &MediaSection, pt: i32) -> String {
    let fmtp = section.fmtp.get(&pt).map(|f| f.as_str()).unwrap_or("");
    match token {
        "ilbc20" | "ilbc30" => {
            if fmtp.contains("mode=20") {
                "ilbc20".to_string()
            } else {
                "ilbc30".to_string()
            }
        }
        "amr" | "amr-o" => {
            if fmtp.contains("octet-align=1") {
                "amr-o".to_string()
            } else {
                "amr".to_string()
            }
        }
        _ => token.to_string(),
    }
}

fn push_format(
    config: &SdpConfig,
    formats: &mut Vec<String>,
    mappings: &mut Vec<(String, i32)>,
    token: &str,
    pt: i32,
) {
    if !config.codec_enabled(token) && token != "g729b" {
        return;
    }
    if formats.iter().any(|f| f == token) {
        return;
    }
    formats.push(token.to_string());
    if super::static_payload(token) != Some(pt) {
        mappings.push((token.to_string(), pt));
    }
}
