//! Per-dialog SDP session state: building offers, interpreting answers and
//! driving the external RTP endpoint through `chan.rtp` messages.

use super::{encoding_for_payload, parser, static_payload, SdpConfig, SdpMedia};
use crate::message::Body;
use crate::party::{AppMessage, Dispatcher};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaStatus {
    Missing,
    Muted,
    Started,
}

/// SDP state of one SIP dialog.
pub struct SdpSession {
    config: Arc<SdpConfig>,
    media_status: MediaStatus,
    rtp_forward: bool,
    sdp_forward: bool,
    media: Option<Vec<SdpMedia>>,
    sdp_session: u64,
    sdp_version: u64,
    host: String,
    external_addr: String,
    rtp_addr: String,
    rtp_local_addr: String,
    secure: bool,
    rfc2833: bool,
}

fn sec_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl SdpSession {
    pub fn new(config: Arc<SdpConfig>) -> Self {
        let secure = config.secure;
        let rfc2833 = config.rfc2833;
        SdpSession {
            config,
            media_status: MediaStatus::Missing,
            rtp_forward: false,
            sdp_forward: false,
            media: None,
            sdp_session: 0,
            sdp_version: 0,
            host: String::new(),
            external_addr: String::new(),
            rtp_addr: String::new(),
            rtp_local_addr: String::new(),
            secure,
            rfc2833,
        }
    }

    /// Create a session taking the per-call overrides from a parameter bag.
    pub fn new_with_params(config: Arc<SdpConfig>, params: &AppMessage) -> Self {
        let mut session = SdpSession::new(config);
        session.rtp_forward = params.get_bool("rtp_forward", false);
        session.secure = params.get_bool("secure", session.secure);
        session.rfc2833 = params.get_bool("rfc2833", session.rfc2833);
        session
    }

    pub fn media_status(&self) -> MediaStatus {
        self.media_status
    }

    pub fn media(&self) -> Option<&Vec<SdpMedia>> {
        self.media.as_ref()
    }

    pub fn media_mut(&mut self) -> Option<&mut Vec<SdpMedia>> {
        self.media.as_mut()
    }

    pub fn rtp_forward(&self) -> bool {
        self.rtp_forward
    }

    pub fn set_rtp_forward(&mut self, forward: bool) {
        self.rtp_forward = forward;
    }

    pub fn rtp_addr(&self) -> &str {
        &self.rtp_addr
    }

    pub fn rtp_local_addr(&self) -> &str {
        &self.rtp_local_addr
    }

    pub fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
    }

    pub fn set_external_addr(&mut self, addr: &str) {
        self.external_addr = addr.to_string();
    }

    /// The address to advertise: the external (NAT) one if known.
    pub fn local_rtp_addr(&self) -> &str {
        if !self.external_addr.is_empty() {
            &self.external_addr
        } else {
            &self.rtp_local_addr
        }
    }

    pub fn sdp_version(&self) -> (u64, u64) {
        (self.sdp_session, self.sdp_version)
    }

    /// Set a new media list. Returns true if anything changed.
    pub fn set_media(&mut self, media: Option<Vec<SdpMedia>>) -> bool {
        let old = self.media.take();
        let mut changed = media.is_some();
        if let Some(old) = old {
            changed = false;
            for m in &old {
                let keep = self
                    .media_by_name(media.as_deref(), m.name())
                    .map(|n| m.same_as(n, self.config.ignore_port))
                    .unwrap_or(false);
                if !keep {
                    changed = true;
                }
            }
        }
        self.media = media;
        changed
    }

    fn media_by_name<'a>(&self, list: Option<&'a [SdpMedia]>, name: &str) -> Option<&'a SdpMedia> {
        list.and_then(|l| l.iter().find(|m| m.name() == name))
    }

    /// Export the media list into an application parameter bag.
    pub fn put_media(&self, msg: &mut AppMessage, put_port: bool) {
        if let Some(media) = &self.media {
            for m in media {
                m.put_media(msg, put_port);
            }
        }
    }

    /// Check if local RTP data changed for at least one media.
    pub fn local_rtp_changed(&self) -> bool {
        self.media
            .as_ref()
            .map(|l| l.iter().any(|m| m.local_changed()))
            .unwrap_or(false)
    }

    pub fn set_local_rtp_changed(&mut self, changed: bool) {
        if let Some(media) = &mut self.media {
            for m in media {
                m.set_local_changed(changed);
            }
        }
    }

    /// Build a `chan.rtp` setup request for one media.
    pub fn build_chan_rtp(&self, media: &SdpMedia, addr: &str, start: bool) -> Option<AppMessage> {
        if addr.is_empty() {
            return None;
        }
        let mut m = AppMessage::new("chan.rtp");
        m.add_param("media", media.name());
        m.add_param("transport", media.transport());
        m.add_param("direction", "bidir");
        if !self.rtp_local_addr.is_empty() {
            m.add_param("localip", &self.rtp_local_addr);
        }
        m.add_param("remoteip", addr);
        if start {
            m.add_param("remoteport", &media.remote_port().to_string());
            m.add_param("format", media.format());
            let payload = media
                .mapped_payload(media.format())
                .or_else(|| static_payload(media.format()));
            if let Some(payload) = payload {
                m.add_param("payload", &payload.to_string());
            }
            m.add_param("evpayload", &media.rfc2833().max(0).to_string());
        }
        if self.secure {
            if !media.remote_crypto().is_empty() {
                match parse_sdes(media.remote_crypto()) {
                    Some((tag, suite, key, params)) => {
                        m.add_param("secure", "true");
                        m.add_param("crypto_tag", &tag.to_string());
                        m.add_param("crypto_suite", suite);
                        m.add_param("crypto_key", key);
                        if !params.is_empty() {
                            m.add_param("crypto_params", params);
                        }
                    }
                    None => warn!("invalid SDES: '{}'", media.remote_crypto()),
                }
            } else if media.securable() {
                m.add_param("secure", "true");
            }
        }
        for (name, value) in media.parameters() {
            m.add_param(&format!("sdp_{}", name), value);
        }
        Some(m)
    }

    /// Dispatch a `chan.rtp` for one media and pick up the reply: local
    /// address, opaque `osdp` attributes and the local crypto description.
    fn dispatch_rtp_media(
        &mut self,
        index: usize,
        addr: &str,
        start: bool,
        pick: bool,
        dispatcher: &dyn Dispatcher,
    ) -> bool {
        let media = match self.media.as_ref().and_then(|l| l.get(index)) {
            Some(m) => m.clone(),
            None => return false,
        };
        let mut msg = match self.build_chan_rtp(&media, addr, start) {
            Some(m) => m,
            None => return false,
        };
        if !dispatcher.dispatch(&mut msg) {
            return false;
        }
        if let Some(m) = self.media.as_mut().and_then(|l| l.get_mut(index)) {
            m.update_from_reply(&msg);
        }
        if !pick {
            return true;
        }
        self.rtp_forward = false;
        if let Some(localip) = msg.get_value("localip") {
            self.rtp_local_addr = localip.to_string();
        }
        self.media_status = MediaStatus::Started;
        let prefix = msg.get_value("osdp-prefix").unwrap_or("osdp").to_string();
        let secure = self.secure;
        if let Some(m) = self.media.as_mut().and_then(|l| l.get_mut(index)) {
            if !prefix.is_empty() {
                let picked: Vec<(String, String)> = msg
                    .params()
                    .filter_map(|(n, v)| {
                        let rest = n.strip_prefix(prefix.as_str())?.strip_prefix('_')?;
                        if rest.is_empty() {
                            None
                        } else {
                            Some((rest.to_string(), v.to_string()))
                        }
                    })
                    .collect();
                for (n, v) in picked {
                    m.parameter(&n, &v, false);
                }
            }
            if secure {
                let tag = msg.get_int("crypto_tag", 1);
                let tag = msg.get_int("ocrypto_tag", tag);
                let suite = msg.get_value("ocrypto_suite");
                let key = msg.get_value("ocrypto_key");
                let params = msg.get_value("ocrypto_params");
                if let (Some(suite), Some(key)) = (suite, key) {
                    if tag > 0 {
                        let mut sdes = format!("{} {} {}", tag, suite, key);
                        if let Some(p) = params {
                            sdes.push(' ');
                            sdes.push_str(p);
                        }
                        m.crypto(&sdes, false);
                    }
                }
            }
        }
        true
    }

    /// Dispatch `chan.rtp` for every media, dropping the ones that fail.
    pub fn dispatch_rtp(&mut self, addr: &str, start: bool, dispatcher: &dyn Dispatcher) -> bool {
        let count = match &self.media {
            Some(l) => l.len(),
            None => return false,
        };
        let mut ok = false;
        let mut failed = Vec::new();
        for i in 0..count {
            if self.dispatch_rtp_media(i, addr, start, true, dispatcher) {
                ok = true;
            } else {
                if let Some(m) = self.media.as_ref().and_then(|l| l.get(i)) {
                    debug!(
                        "removing failed SDP media '{}' format '{}' from offer",
                        m.name(),
                        m.format()
                    );
                }
                failed.push(i);
            }
        }
        if let Some(list) = &mut self.media {
            for i in failed.into_iter().rev() {
                list.remove(i);
            }
        }
        ok
    }

    /// Try to start RTP for all media already negotiated.
    pub fn start_rtp(&mut self, dispatcher: &dyn Dispatcher) -> bool {
        if self.rtp_forward || self.media.is_none() || self.media_status != MediaStatus::Started {
            return false;
        }
        let addr = self.rtp_addr.clone();
        let count = self.media.as_ref().map(|l| l.len()).unwrap_or(0);
        let mut ok = false;
        for i in 0..count {
            ok = self.dispatch_rtp_media(i, &addr, true, false, dispatcher) || ok;
        }
        ok
    }

    /// Update the media list from application parameters carrying
    /// `media[_suffix]`, `formats[_suffix]`, `transport[_suffix]`,
    /// `crypto[_suffix]` and opaque `osdp` attributes. Falls back to a
    /// default audio media when no media parameter is present at all.
    pub fn update_sdp(&mut self, params: &AppMessage) -> bool {
        let prefix = params.get_value("osdp-prefix").unwrap_or("osdp").to_string();
        let def_formats = self.config.audio_formats();
        let mut defaults = true;
        let mut list: Vec<SdpMedia> = Vec::new();
        let names: Vec<(String, String)> = params
            .params()
            .filter_map(|(n, _)| {
                let rest = n.strip_prefix("media")?;
                if !rest.is_empty() && !rest.starts_with('_') {
                    return None;
                }
                Some((n.to_string(), rest.to_string()))
            })
            .collect();
        for (pname, suffix) in names {
            // at least one media declaration disables the defaults
            defaults = false;
            let audio = suffix.is_empty();
            if !params.get_bool(&pname, audio) {
                continue;
            }
            let mut fmts = params
                .get_value(&format!("formats{}", suffix))
                .unwrap_or("")
                .to_string();
            if audio && fmts.is_empty() {
                fmts = def_formats.clone();
            }
            if fmts.is_empty() {
                continue;
            }
            let trans = params
                .get_value(&format!("transport{}", suffix))
                .unwrap_or("RTP/AVP")
                .to_string();
            let crypto = if self.secure {
                params
                    .get_value(&format!("crypto{}", suffix))
                    .unwrap_or("")
                    .to_string()
            } else {
                String::new()
            };
            let name = if audio {
                "audio".to_string()
            } else {
                suffix[1..].to_string()
            };
            // reuse the old descriptor so SDES and the dirty bit survive
            let (mut rtp, append) = match self.take_media(&name) {
                Some(mut old) => {
                    old.update(&fmts, None, None);
                    (old, false)
                }
                None => (SdpMedia::new(&name, &trans, &fmts), true),
            };
            rtp.crypto(&crypto, false);
            copy_osdp_params(&mut rtp, params, &prefix, append);
            list.push(rtp);
        }
        if defaults && list.is_empty() {
            let fmts = params.get_value("formats").unwrap_or(&def_formats);
            list.push(SdpMedia::new("audio", "RTP/AVP", fmts));
        }
        self.set_media(if list.is_empty() { None } else { Some(list) })
    }

    /// Update RTP and SDP data from application parameters, including the
    /// remote endpoint address and payload mappings.
    pub fn update_rtp_sdp(&mut self, params: &AppMessage) -> bool {
        let mut addr = String::new();
        let list = update_rtp_sdp_params(self.secure, params, &mut addr, &mut self.media);
        match list {
            Some(list) => {
                let changed = self.rtp_local_addr != addr;
                self.rtp_local_addr = addr;
                self.set_media(Some(list)) || changed
            }
            None => false,
        }
    }

    fn take_media(&mut self, name: &str) -> Option<SdpMedia> {
        let list = self.media.as_mut()?;
        let pos = list.iter().position(|m| m.name() == name)?;
        Some(list.remove(pos))
    }

    /// Create an SDP body from a transport address and the session's media
    /// list. A missing address means the session is on hold.
    pub fn create_sdp(&mut self, addr: Option<&str>) -> Option<Body> {
        let media = self.media.take()?;
        let body = self.create_sdp_for(addr, &media);
        self.media = Some(media);
        body
    }

    fn create_sdp_for(&mut self, addr: Option<&str>, media_list: &[SdpMedia]) -> Option<Body> {
        if self.sdp_session != 0 {
            self.sdp_version += 1;
        } else {
            self.sdp_session = sec_now();
            self.sdp_version = self.sdp_session;
        }
        let mut sdp = String::new();
        sdp.push_str("v=0\r\n");
        sdp.push_str(&format!(
            "o=telstack {} {} IN IP4 {}\r\n",
            self.sdp_session,
            self.sdp_version,
            addr.unwrap_or(&self.host)
        ));
        sdp.push_str(&format!("s={}\r\n", self.config.session_name));
        // a null address puts the other side on hold
        sdp.push_str(&format!("c=IN IP4 {}\r\n", addr.unwrap_or("0.0.0.0")));
        sdp.push_str("t=0 0\r\n");

        for m in media_list {
            let mut frm = String::new();
            let mut rtpmap: Vec<String> = Vec::new();
            let mut ptime = 0;
            for token in m.formats() {
                let mut mode = 0;
                match token.as_str() {
                    "ilbc20" => {
                        mode = 20;
                        ptime = 20;
                    }
                    "ilbc30" => {
                        mode = 30;
                        ptime = 30;
                    }
                    // never emitted on its own, only drives annexb below
                    "g729b" => continue,
                    _ => {}
                }
                let def_payload = static_payload(token);
                let payload = m.mapped_payload(token).or(def_payload);
                let payload = match payload {
                    Some(p) if p >= 0 => p,
                    _ => {
                        debug!("skipping unknown format '{}'", token);
                        continue;
                    }
                };
                let defcode = def_payload.unwrap_or(payload);
                let encoding = match encoding_for_payload(defcode) {
                    Some(e) => e,
                    None => {
                        debug!("no rtpmap for format '{}'", token);
                        continue;
                    }
                };
                if !self.config.codec_enabled(token) {
                    continue;
                }
                frm.push_str(&format!(" {}", payload));
                rtpmap.push(format!("rtpmap:{} {}", payload, encoding));
                if mode != 0 {
                    rtpmap.push(format!("fmtp:{} mode={}", payload, mode));
                }
                if token == "g729" {
                    let annexb = m.formats().iter().any(|f| f == "g729b");
                    rtpmap.push(format!(
                        "fmtp:{} annexb={}",
                        payload,
                        if annexb { "yes" } else { "no" }
                    ));
                } else if token == "amr" {
                    rtpmap.push(format!("fmtp:{} octet-align=0", payload));
                } else if token == "amr-o" {
                    rtpmap.push(format!("fmtp:{} octet-align=1", payload));
                }
            }

            if self.rfc2833 && !frm.is_empty() && m.is_audio() {
                // claim to support telephone events
                let rfc2833 = if m.rfc2833() >= 0 { m.rfc2833() } else { 101 };
                frm.push_str(&format!(" {}", rfc2833));
                rtpmap.push(format!("rtpmap:{} telephone-event/8000", rfc2833));
            }

            if frm.is_empty() {
                if m.is_audio() || m.formats().is_empty() {
                    debug!("no formats for '{}', excluding from SDP", m.name());
                    continue;
                }
                // pass the unknown formats through verbatim
                debug!("assuming formats '{}' for media '{}'", m.fmt_list(), m.name());
                frm = format!(" {}", m.formats().join(" "));
            }

            if ptime != 0 {
                rtpmap.push(format!("ptime:{}", ptime));
            }

            sdp.push_str(&format!(
                "m={} {} {}{}\r\n",
                m.name(),
                m.local_port(),
                m.transport(),
                frm
            ));
            let mut enc = false;
            if m.is_modified() {
                for (name, value) in m.parameters() {
                    if value.is_empty() {
                        sdp.push_str(&format!("a={}\r\n", name));
                    } else {
                        sdp.push_str(&format!("a={}:{}\r\n", name, value));
                    }
                    enc = enc || name == "encryption";
                }
            }
            for line in &rtpmap {
                sdp.push_str(&format!("a={}\r\n", line));
            }
            if self.secure && addr.is_some() && !m.local_crypto().is_empty() {
                sdp.push_str(&format!("a=crypto:{}\r\n", m.local_crypto()));
                if !enc {
                    sdp.push_str("a=encryption:optional\r\n");
                }
            }
        }
        Some(Body::sdp(sdp.into_bytes()))
    }

    /// Create an SDP body for the current media status.
    pub fn create_sdp_status(&mut self) -> Option<Body> {
        match self.media_status {
            MediaStatus::Started => {
                let addr = self.local_rtp_addr().to_string();
                self.create_sdp(Some(&addr))
            }
            MediaStatus::Muted => self.create_sdp(None),
            MediaStatus::Missing => None,
        }
    }

    /// Interpret a received SDP body: remote address, ports, the codec
    /// intersection and remote SDES. Existing descriptors are reused so
    /// local state survives re-negotiation. When this session already
    /// offered, its own preference order wins.
    pub fn update_from_sdp(&mut self, text: &str) -> bool {
        let (addr, parsed) = match parser::parse_sdp(&self.config, text) {
            Some(r) => r,
            None => return false,
        };
        let mut changed = self.rtp_addr != addr;
        self.rtp_addr = addr;
        let mut list = Vec::new();
        for mut new in parsed {
            if let Some(mut old) = self.take_media(new.name()) {
                let offered: Vec<String> = old.formats().to_vec();
                let answered = new.formats();
                let fmts: Vec<String> = if offered.is_empty() {
                    answered.to_vec()
                } else {
                    // we offered: keep our preference order
                    offered
                        .iter()
                        .filter(|f| answered.iter().any(|a| a == *f) || *f == "g729b")
                        .cloned()
                        .collect()
                };
                changed |= old.update(&fmts.join(","), Some(new.remote_port()), None);
                if !new.remote_crypto().is_empty() {
                    changed |= old.remote_crypto() != new.remote_crypto();
                    old.crypto(new.remote_crypto(), true);
                }
                if new.rfc2833() >= 0 {
                    old.set_rfc2833(new.rfc2833());
                }
                for (t, p) in mappings_of(&new) {
                    old.add_mapping(&t, p);
                }
                list.push(old);
            } else {
                new.set_local_changed(true);
                changed = true;
                list.push(new);
            }
        }
        if self.media_status == MediaStatus::Missing {
            self.media_status = MediaStatus::Started;
        }
        self.set_media(Some(list)) || changed
    }

    /// Republish the raw received SDP instead of regenerating it, when
    /// both sides forward RTP and SDP forwarding is enabled.
    pub fn create_passthrough_sdp(&mut self, msg: &mut AppMessage, update: bool) -> Option<Body> {
        let forward = msg.get_bool("rtp_forward", false);
        msg.clear_param("rtp_forward");
        if !(self.rtp_forward && forward) {
            return None;
        }
        if let Some(raw) = msg.get_value("sdp_raw") {
            self.sdp_forward = self.sdp_forward || self.config.sdp_forward;
            if self.sdp_forward {
                let body = Body::sdp(raw.as_bytes().to_vec());
                msg.set_param("rtp_forward", "accepted");
                return Some(body);
            }
        }
        let mut addr = String::new();
        let mut old = if update { self.media.take() } else { None };
        let list = match update_rtp_sdp_params(self.secure, msg, &mut addr, &mut old) {
            Some(list) => list,
            None => {
                if update {
                    self.media = old;
                }
                return None;
            }
        };
        let sdp = self.create_sdp_for(Some(&addr), &list);
        if update {
            self.rtp_local_addr = addr;
            self.set_media(Some(list));
        }
        if sdp.is_some() {
            msg.set_param("rtp_forward", "accepted");
        }
        sdp
    }

    /// Refresh format lists from `formats[_suffix]` parameters without
    /// rebuilding the media list.
    pub fn update_formats(&mut self, msg: &AppMessage) {
        if self.media.is_none() {
            return;
        }
        let updates: Vec<(String, String)> = msg
            .params()
            .filter_map(|(n, v)| {
                let rest = n.strip_prefix("formats")?;
                if !rest.is_empty() && !rest.starts_with('_') {
                    return None;
                }
                let name = if rest.is_empty() {
                    "audio".to_string()
                } else {
                    rest[1..].to_string()
                };
                Some((name, v.to_string()))
            })
            .collect();
        for (name, fmts) in updates {
            if let Some(m) = self
                .media
                .as_mut()
                .and_then(|l| l.iter_mut().find(|m| m.name() == name))
            {
                if m.update(&fmts, None, None) {
                    debug!("formats for '{}' changed to '{}'", name, fmts);
                }
            }
        }
    }

    /// Add raw SDP forwarding parameters to an outgoing message.
    pub fn add_sdp_params(&mut self, msg: &mut AppMessage, raw_sdp: &str) -> bool {
        if !self.sdp_forward {
            return false;
        }
        msg.set_param("rtp_forward", "yes");
        msg.add_param("sdp_raw", raw_sdp);
        true
    }

    /// Add RTP forwarding parameters to an outgoing message, trying to
    /// start local RTP first.
    pub fn add_rtp_params(
        &mut self,
        msg: &mut AppMessage,
        nat_addr: &str,
        raw_sdp: Option<&str>,
        force: bool,
        dispatcher: &dyn Dispatcher,
    ) -> bool {
        if self.media.is_none() || self.rtp_addr.is_empty() {
            return false;
        }
        self.put_media_into(msg);
        if force || (!self.start_rtp(dispatcher) && self.rtp_forward) {
            if !nat_addr.is_empty() {
                msg.add_param("rtp_nat_addr", nat_addr);
            }
            msg.add_param("rtp_forward", "yes");
            msg.add_param("rtp_addr", &self.rtp_addr.clone());
            if let Some(media) = &self.media {
                for m in media {
                    msg.add_param(
                        &format!("rtp_port{}", m.suffix()),
                        &m.remote_port().to_string(),
                    );
                    if m.is_audio() && m.rfc2833() >= 0 {
                        msg.add_param("rtp_rfc2833", &m.rfc2833().to_string());
                    }
                }
            }
            if let Some(raw) = raw_sdp {
                self.add_sdp_params(msg, raw);
            }
            return true;
        }
        false
    }

    fn put_media_into(&self, msg: &mut AppMessage) {
        if let Some(media) = &self.media {
            for m in media {
                m.put_media(msg, false);
            }
        }
    }

    /// Reset the session to defaults.
    pub fn reset(&mut self) {
        self.media_status = MediaStatus::Missing;
        self.media = None;
        self.rtp_forward = false;
        self.sdp_forward = false;
        self.external_addr.clear();
        self.rtp_addr.clear();
        self.rtp_local_addr.clear();
        self.sdp_session = 0;
        self.sdp_version = 0;
        self.host.clear();
        self.secure = self.config.secure;
        self.rfc2833 = self.config.rfc2833;
    }
}

fn mappings_of(media: &SdpMedia) -> Vec<(String, i32)> {
    media
        .formats()
        .iter()
        .filter_map(|t| media.mapped_payload(t).map(|p| (t.clone(), p)))
        .collect()
}

/// Parse an SDES description: `<tag> <suite> <key>[ <params>]`.
fn parse_sdes(sdes: &str) -> Option<(u32, &str, &str, &str)> {
    let mut it = sdes.splitn(4, ' ').filter(|s| !s.is_empty());
    let tag: u32 = it.next()?.parse().ok()?;
    let suite = it.next()?;
    let key = it.next()?;
    let params = it.next().unwrap_or("").trim();
    Some((tag, suite, key, params))
}

fn copy_osdp_params(media: &mut SdpMedia, params: &AppMessage, prefix: &str, append: bool) {
    if prefix.is_empty() {
        return;
    }
    let want = format!("{}{}_", prefix, media.suffix());
    let picked: Vec<(String, String)> = params
        .params()
        .filter_map(|(n, v)| {
            let rest = n.strip_prefix(want.as_str())?;
            if rest.is_empty() || rest.contains('_') {
                None
            } else {
                Some((rest.to_string(), v.to_string()))
            }
        })
        .collect();
    for (n, v) in picked {
        media.parameter(&n, &v, append);
    }
}

/// Build a media list from `rtp_addr`, `rtp_port[_suffix]`,
/// `rtp_mapping[_suffix]` and friends, reusing old descriptors by name.
fn update_rtp_sdp_params(
    secure: bool,
    params: &AppMessage,
    rtp_addr: &mut String,
    old: &mut Option<Vec<SdpMedia>>,
) -> Option<Vec<SdpMedia>> {
    let addr = params.get_value("rtp_addr")?;
    if addr.is_empty() {
        return None;
    }
    *rtp_addr = addr.to_string();
    let prefix = params.get_value("osdp-prefix").unwrap_or("osdp").to_string();
    let mut list: Vec<SdpMedia> = Vec::new();
    let ports: Vec<(String, String)> = params
        .params()
        .filter_map(|(n, v)| {
            let rest = n.strip_prefix("rtp_port")?;
            if !rest.is_empty() && !rest.starts_with('_') {
                return None;
            }
            Some((rest.to_string(), v.to_string()))
        })
        .collect();
    for (suffix, port) in ports {
        let audio = suffix.is_empty();
        if !params.get_bool(&format!("media{}", suffix), audio) {
            continue;
        }
        let port: u16 = match port.trim().parse() {
            Ok(p) if p != 0 => p,
            _ => continue,
        };
        let fmts = match params.get_value(&format!("formats{}", suffix)) {
            Some(f) if !f.is_empty() => f.to_string(),
            _ => continue,
        };
        let trans = params
            .get_value(&format!("transport{}", suffix))
            .unwrap_or("RTP/AVP")
            .to_string();
        let name = if audio {
            "audio".to_string()
        } else {
            suffix[1..].to_string()
        };
        let (mut rtp, append) = match old
            .as_mut()
            .and_then(|l| l.iter().position(|m| m.name() == name).map(|i| l.remove(i)))
        {
            Some(mut m) => {
                m.update(&fmts, Some(port), None);
                (m, false)
            }
            None => {
                let mut m = SdpMedia::new(&name, &trans, &fmts);
                m.set_remote_port(port);
                (m, true)
            }
        };
        copy_osdp_params(&mut rtp, params, &prefix, append);
        if let Some(mapping) = params.get_value(&format!("rtp_mapping{}", rtp.suffix())) {
            rtp.set_mappings(mapping);
        }
        if audio {
            rtp.set_rfc2833(params.get_int("rtp_rfc2833", -1) as i32);
        }
        if secure {
            if let Some(crypto) = params.get_value(&format!("crypto{}", rtp.suffix())) {
                rtp.crypto(crypto, false);
            }
        }
        list.push(rtp);
    }
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}
