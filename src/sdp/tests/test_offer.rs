//! Offer construction tests: line layout, codec mapping, fmtp rules and
//! version bumping.

use super::{body_text, session};
use crate::party::AppMessage;
use crate::sdp::SdpMedia;

fn offer_for(formats: &str) -> Option<String> {
    let mut s = session();
    let mut media = SdpMedia::new("audio", "RTP/AVP", formats);
    media.set_local_port(5004);
    s.set_media(Some(vec![media]));
    s.create_sdp(Some("192.0.2.10")).map(|b| body_text(&b))
}

#[test]
fn test_offer_line_order_and_codecs() {
    let sdp = offer_for("mulaw,alaw").unwrap();
    let lines: Vec<&str> = sdp.lines().collect();
    assert!(lines[0].starts_with("v=0"));
    assert!(lines[1].starts_with("o=telstack "));
    assert!(lines[1].ends_with("IN IP4 192.0.2.10"));
    assert!(lines[2].starts_with("s="));
    assert_eq!(lines[3], "c=IN IP4 192.0.2.10");
    assert_eq!(lines[4], "t=0 0");
    assert_eq!(lines[5], "m=audio 5004 RTP/AVP 0 8 101");
    assert!(sdp.contains("a=rtpmap:0 PCMU/8000\r\n"));
    assert!(sdp.contains("a=rtpmap:8 PCMA/8000\r\n"));
    assert!(sdp.contains("a=rtpmap:101 telephone-event/8000\r\n"));
}

#[test]
fn test_g729_annexb_matrix() {
    // both variants offered: payload 18 once, annexb=yes
    let sdp = offer_for("g729,g729b").unwrap();
    assert!(sdp.contains("m=audio 5004 RTP/AVP 18 101\r\n"));
    assert!(sdp.contains("a=fmtp:18 annexb=yes\r\n"));
    // plain g729: annexb=no
    let sdp = offer_for("g729").unwrap();
    assert!(sdp.contains("a=fmtp:18 annexb=no\r\n"));
    // g729b alone emits no payload and the media drops out entirely
    let sdp = offer_for("g729b").unwrap();
    assert!(!sdp.contains("m=audio"));
    assert!(!sdp.contains("fmtp"));
}

#[test]
fn test_ilbc_mode_and_ptime() {
    let sdp = offer_for("ilbc20").unwrap();
    assert!(sdp.contains("a=rtpmap:98 iLBC/8000\r\n"));
    assert!(sdp.contains("a=fmtp:98 mode=20\r\n"));
    assert!(sdp.contains("a=ptime:20\r\n"));
    let sdp = offer_for("ilbc30").unwrap();
    assert!(sdp.contains("a=fmtp:98 mode=30\r\n"));
    assert!(sdp.contains("a=ptime:30\r\n"));
}

#[test]
fn test_amr_octet_align() {
    let sdp = offer_for("amr").unwrap();
    assert!(sdp.contains("a=fmtp:96 octet-align=0\r\n"));
    let sdp = offer_for("amr-o").unwrap();
    assert!(sdp.contains("a=fmtp:96 octet-align=1\r\n"));
}

#[test]
fn test_dynamic_mapping_overrides_static() {
    let mut s = session();
    let mut media = SdpMedia::new("audio", "RTP/AVP", "g729");
    media.set_local_port(5004);
    media.add_mapping("g729", 96);
    s.set_media(Some(vec![media]));
    let sdp = body_text(&s.create_sdp(Some("192.0.2.10")).unwrap());
    assert!(sdp.contains("m=audio 5004 RTP/AVP 96 101\r\n"));
    // encoding still comes from the default payload of the token
    assert!(sdp.contains("a=rtpmap:96 G729/8000\r\n"));
}

#[test]
fn test_hold_offer_and_version_bump() {
    let mut s = session();
    let mut media = SdpMedia::new("audio", "RTP/AVP", "mulaw");
    media.set_local_port(5004);
    s.set_media(Some(vec![media]));
    s.set_host("198.51.100.7");
    let first = body_text(&s.create_sdp(Some("192.0.2.10")).unwrap());
    let (sid1, ver1) = s.sdp_version();
    assert_eq!(sid1, ver1);
    // hold: null address renders as 0.0.0.0, origin keeps the host
    let hold = body_text(&s.create_sdp(None).unwrap());
    assert!(hold.contains("c=IN IP4 0.0.0.0\r\n"));
    assert!(hold.contains("IN IP4 198.51.100.7"));
    let (sid2, ver2) = s.sdp_version();
    assert_eq!(sid1, sid2, "session id is stable");
    assert!(ver2 > ver1, "version grows with every new offer");
    assert_ne!(first, hold);
}

#[test]
fn test_non_audio_formats_pass_verbatim() {
    let mut s = session();
    let mut image = SdpMedia::new("image", "udptl", "t38");
    image.set_local_port(6000);
    s.set_media(Some(vec![image]));
    let sdp = body_text(&s.create_sdp(Some("192.0.2.10")).unwrap());
    // unknown format on non-audio media is passed through, not dropped
    assert!(sdp.contains("m=image 6000 udptl t38\r\n"));
}

#[test]
fn test_modified_attributes_emitted() {
    let mut s = session();
    let mut media = SdpMedia::new("audio", "RTP/AVP", "mulaw");
    media.set_local_port(5004);
    media.parameter("sendonly", "", false);
    media.parameter("label", "42", false);
    s.set_media(Some(vec![media]));
    let sdp = body_text(&s.create_sdp(Some("192.0.2.10")).unwrap());
    assert!(sdp.contains("a=sendonly\r\n"));
    assert!(sdp.contains("a=label:42\r\n"));
}

#[test]
fn test_crypto_line_on_secure_session() {
    let mut s = super::secure_session();
    let mut media = SdpMedia::new("audio", "RTP/AVP", "mulaw");
    media.set_local_port(5004);
    media.crypto("1 AES_CM_128_HMAC_SHA1_80 inline:PS1uQCVeeCFCanVmcjkpPywjNWhcYD0mXXtxaVBR", false);
    s.set_media(Some(vec![media]));
    let sdp = body_text(&s.create_sdp(Some("192.0.2.10")).unwrap());
    assert!(sdp.contains(
        "a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:PS1uQCVeeCFCanVmcjkpPywjNWhcYD0mXXtxaVBR\r\n"
    ));
    assert!(sdp.contains("a=encryption:optional\r\n"));
    // an explicit encryption attribute suppresses the implicit one
    let mut s = super::secure_session();
    let mut media = SdpMedia::new("audio", "RTP/AVP", "mulaw");
    media.set_local_port(5004);
    media.crypto("1 AES_CM_128_HMAC_SHA1_80 inline:AAAA", false);
    media.parameter("encryption", "required", false);
    s.set_media(Some(vec![media]));
    let sdp = body_text(&s.create_sdp(Some("192.0.2.10")).unwrap());
    assert!(sdp.contains("a=encryption:required\r\n"));
    assert!(!sdp.contains("a=encryption:optional\r\n"));
}

#[test]
fn test_update_sdp_from_params() {
    let mut s = session();
    let mut params = AppMessage::new("call.execute");
    params.add_param("media", "yes");
    params.add_param("formats", "alaw,mulaw");
    params.add_param("media_video", "yes");
    params.add_param("formats_video", "h263");
    params.add_param("transport_video", "RTP/AVP");
    params.add_param("osdp_direction", "sendrecv");
    assert!(s.update_sdp(&params));
    let media = s.media().unwrap();
    assert_eq!(media.len(), 2);
    assert_eq!(media[0].fmt_list(), "alaw,mulaw");
    assert_eq!(media[0].get_parameter("direction"), Some("sendrecv"));
    assert_eq!(media[1].name(), "video");
    assert_eq!(media[1].fmt_list(), "h263");
    // defaults kick in when no media parameter is present at all
    let mut s = session();
    let params = AppMessage::new("call.execute");
    assert!(s.update_sdp(&params));
    let media = s.media().unwrap();
    assert_eq!(media.len(), 1);
    assert!(media[0].is_audio());
    assert!(!media[0].fmt_list().is_empty());
}
