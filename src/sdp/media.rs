//! Per-media-line state tracked across offers and answers.

use crate::party::AppMessage;

/// One `m=` line worth of negotiation state: format list, payload
/// mappings, ports, SDES material and the attribute bag. The
/// `local_changed` bit decides whether a new offer must be sent.
#[derive(Debug, Clone)]
pub struct SdpMedia {
    name: String,
    suffix: String,
    transport: String,
    formats: Vec<String>,
    format: String,
    local_port: u16,
    remote_port: u16,
    mappings: Vec<(String, i32)>,
    rfc2833: i32,
    local_crypto: String,
    remote_crypto: String,
    attrs: Vec<(String, String)>,
    modified: bool,
    local_changed: bool,
}

impl SdpMedia {
    pub fn new(name: &str, transport: &str, formats: &str) -> Self {
        let suffix = if name == "audio" {
            String::new()
        } else {
            format!("_{}", name)
        };
        SdpMedia {
            name: name.to_string(),
            suffix,
            transport: transport.to_string(),
            formats: split_formats(formats),
            format: String::new(),
            local_port: 0,
            remote_port: 0,
            mappings: Vec::new(),
            rfc2833: -1,
            local_crypto: String::new(),
            remote_crypto: String::new(),
            attrs: Vec::new(),
            modified: false,
            local_changed: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter name suffix: empty for audio, `_<name>` otherwise.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn is_audio(&self) -> bool {
        self.name == "audio"
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    /// Comma separated format list as carried in application messages.
    pub fn fmt_list(&self) -> String {
        self.formats.join(",")
    }

    /// The working codec: first of the negotiated list unless picked
    /// explicitly.
    pub fn format(&self) -> &str {
        if self.format.is_empty() {
            self.formats.first().map(|f| f.as_str()).unwrap_or("")
        } else {
            &self.format
        }
    }

    pub fn set_format(&mut self, format: &str) {
        self.format = format.to_string();
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn set_local_port(&mut self, port: u16) {
        if self.local_port != port {
            self.local_port = port;
            self.local_changed = true;
        }
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn set_remote_port(&mut self, port: u16) {
        self.remote_port = port;
    }

    /// Update format list and ports. Returns true when anything changed.
    pub fn update(&mut self, formats: &str, remote_port: Option<u16>, local_port: Option<u16>) -> bool {
        let mut changed = false;
        let formats = split_formats(formats);
        if !formats.is_empty() && formats != self.formats {
            self.formats = formats;
            if !self.format.is_empty() && !self.formats.iter().any(|f| *f == self.format) {
                self.format.clear();
            }
            changed = true;
        }
        if let Some(port) = remote_port {
            if self.remote_port != port {
                self.remote_port = port;
                changed = true;
            }
        }
        if let Some(port) = local_port {
            if self.local_port != port {
                self.local_port = port;
                self.local_changed = true;
                changed = true;
            }
        }
        changed
    }

    /// Pick up the RTP endpoint reply: local port and chosen format.
    pub fn update_from_reply(&mut self, msg: &AppMessage) {
        if let Some(port) = msg.get_value("localport").and_then(|p| p.parse().ok()) {
            self.local_port = port;
        }
        if let Some(fmt) = msg.get_value("format") {
            if !fmt.is_empty() {
                self.format = fmt.to_string();
            }
        }
    }

    /// Dynamic payload number mapped for a token, if any.
    pub fn mapped_payload(&self, token: &str) -> Option<i32> {
        self.mappings
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, p)| *p)
    }

    /// Replace the mapping table from its `tok=pt,tok=pt` string form.
    pub fn set_mappings(&mut self, mappings: &str) {
        self.mappings = mappings
            .split(',')
            .filter_map(|m| {
                let (t, p) = m.trim().split_once('=')?;
                Some((t.trim().to_string(), p.trim().parse().ok()?))
            })
            .collect();
    }

    pub fn add_mapping(&mut self, token: &str, payload: i32) {
        if self.mapped_payload(token).is_none() {
            self.mappings.push((token.to_string(), payload));
        }
    }

    pub fn mappings_str(&self) -> String {
        self.mappings
            .iter()
            .map(|(t, p)| format!("{}={}", t, p))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// RFC 2833 telephone-event payload, negative when unset.
    pub fn rfc2833(&self) -> i32 {
        self.rfc2833
    }

    pub fn set_rfc2833(&mut self, payload: i32) {
        self.rfc2833 = payload;
    }

    pub fn local_crypto(&self) -> &str {
        &self.local_crypto
    }

    pub fn remote_crypto(&self) -> &str {
        &self.remote_crypto
    }

    /// Set an SDES description. Changing the local one marks the media as
    /// locally changed so a new offer gets sent.
    pub fn crypto(&mut self, desc: &str, remote: bool) {
        let slot = if remote {
            &mut self.remote_crypto
        } else {
            &mut self.local_crypto
        };
        if *slot != desc {
            *slot = desc.to_string();
            if !remote {
                self.local_changed = true;
            }
        }
    }

    /// The media can be secured: no remote description seen yet or one is
    /// already present.
    pub fn securable(&self) -> bool {
        self.remote_crypto.is_empty()
    }

    /// Set or update an attribute bag entry. `append` adds without looking
    /// for an existing entry.
    pub fn parameter(&mut self, name: &str, value: &str, append: bool) {
        self.modified = true;
        if !append {
            if let Some((_, v)) = self.attrs.iter_mut().find(|(n, _)| n == name) {
                *v = value.to_string();
                return;
            }
        }
        self.attrs.push((name.to_string(), value.to_string()));
    }

    pub fn get_parameter(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn local_changed(&self) -> bool {
        self.local_changed
    }

    pub fn set_local_changed(&mut self, changed: bool) {
        self.local_changed = changed;
    }

    /// Compare against another descriptor, used to decide whether media
    /// actually changed on an update.
    pub fn same_as(&self, other: &SdpMedia, ignore_port: bool) -> bool {
        self.name == other.name
            && self.transport == other.transport
            && self.formats == other.formats
            && (ignore_port
                || (self.local_port == other.local_port && self.remote_port == other.remote_port))
    }

    /// Export this media into an application parameter bag.
    pub fn put_media(&self, msg: &mut AppMessage, put_port: bool) {
        msg.set_param(&format!("media{}", self.suffix), "yes");
        msg.set_param(&format!("formats{}", self.suffix), &self.fmt_list());
        msg.set_param(&format!("transport{}", self.suffix), &self.transport);
        if put_port && self.remote_port != 0 {
            msg.set_param(
                &format!("rtp_port{}", self.suffix),
                &self.remote_port.to_string(),
            );
        }
        if self.is_audio() && self.rfc2833 >= 0 {
            msg.set_param("rtp_rfc2833", &self.rfc2833.to_string());
        }
    }
}

fn split_formats(formats: &str) -> Vec<String> {
    formats
        .split(',')
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect()
}
