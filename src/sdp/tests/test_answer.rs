//! Answer interpretation tests: parsing, codec intersection and ordering.

use super::{body_text, session};
use crate::sdp::{parser, SdpConfig, SdpMedia};

const ANSWER: &str = "v=0\r\n\
    o=remote 12345 12345 IN IP4 203.0.113.5\r\n\
    s=call\r\n\
    c=IN IP4 203.0.113.5\r\n\
    t=0 0\r\n\
    m=audio 49172 RTP/AVP 8 0 101\r\n\
    a=rtpmap:8 PCMA/8000\r\n\
    a=rtpmap:0 PCMU/8000\r\n\
    a=rtpmap:101 telephone-event/8000\r\n\
    a=sendrecv\r\n";

#[test]
fn test_parse_basic_answer() {
    let cfg = SdpConfig::default();
    let (addr, media) = parser::parse_sdp(&cfg, ANSWER).unwrap();
    assert_eq!(addr, "203.0.113.5");
    assert_eq!(media.len(), 1);
    let m = &media[0];
    assert!(m.is_audio());
    assert_eq!(m.remote_port(), 49172);
    // answerer order preserved
    assert_eq!(m.fmt_list(), "alaw,mulaw");
    assert_eq!(m.rfc2833(), 101);
    assert_eq!(m.get_parameter("sendrecv"), Some(""));
}

#[test]
fn test_parse_dynamic_payload_mapping() {
    let cfg = SdpConfig::default();
    let text = "v=0\r\nc=IN IP4 203.0.113.5\r\n\
        m=audio 4000 RTP/AVP 96 97\r\n\
        a=rtpmap:96 G729/8000\r\n\
        a=rtpmap:97 iLBC/8000\r\n\
        a=fmtp:97 mode=20\r\n";
    let (_, media) = parser::parse_sdp(&cfg, text).unwrap();
    let m = &media[0];
    assert_eq!(m.fmt_list(), "g729,ilbc20");
    assert_eq!(m.mapped_payload("g729"), Some(96));
    assert_eq!(m.mapped_payload("ilbc20"), Some(97));
}

#[test]
fn test_parse_g729_annexb_adds_variant() {
    let cfg = SdpConfig::default();
    let text = "v=0\r\nc=IN IP4 203.0.113.5\r\n\
        m=audio 4000 RTP/AVP 18\r\n\
        a=fmtp:18 annexb=yes\r\n";
    let (_, media) = parser::parse_sdp(&cfg, text).unwrap();
    assert_eq!(media[0].fmt_list(), "g729,g729b");
}

#[test]
fn test_parse_unknown_codecs_skipped() {
    let cfg = SdpConfig::default();
    let text = "v=0\r\nc=IN IP4 203.0.113.5\r\n\
        m=audio 4000 RTP/AVP 0 119\r\n\
        a=rtpmap:119 X-EXPERIMENTAL/16000\r\n";
    let (_, media) = parser::parse_sdp(&cfg, text).unwrap();
    assert_eq!(media[0].fmt_list(), "mulaw");
}

#[test]
fn test_parse_crypto_line() {
    let cfg = SdpConfig::default();
    let text = "v=0\r\nc=IN IP4 203.0.113.5\r\n\
        m=audio 4000 RTP/AVP 0\r\n\
        a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:WVNfX19zZW1jdGwgKCkgewkyMjA7fQp9CnVubGVz\r\n";
    let (_, media) = parser::parse_sdp(&cfg, text).unwrap();
    assert_eq!(
        media[0].remote_crypto(),
        "1 AES_CM_128_HMAC_SHA1_80 inline:WVNfX19zZW1jdGwgKCkgewkyMjA7fQp9CnVubGVz"
    );
}

#[test]
fn test_offer_parse_intersection_law() {
    // an offer we build, parsed back, intersects to the same codec list
    let mut s = session();
    let formats = "mulaw,alaw,g729";
    let mut media = SdpMedia::new("audio", "RTP/AVP", formats);
    media.set_local_port(5004);
    s.set_media(Some(vec![media]));
    let sdp = body_text(&s.create_sdp(Some("192.0.2.10")).unwrap());
    let cfg = SdpConfig::default();
    let (_, parsed) = parser::parse_sdp(&cfg, &sdp).unwrap();
    assert_eq!(parsed[0].fmt_list(), formats);
}

#[test]
fn test_update_from_sdp_keeps_offer_order() {
    let mut s = session();
    // we offered with our preference order
    let mut media = SdpMedia::new("audio", "RTP/AVP", "g729,mulaw,alaw");
    media.set_local_port(5004);
    s.set_media(Some(vec![media]));
    s.set_local_rtp_changed(false);
    // the answer prefers alaw and drops g729
    let answer = "v=0\r\nc=IN IP4 203.0.113.5\r\n\
        m=audio 49172 RTP/AVP 8 0\r\n";
    assert!(s.update_from_sdp(answer));
    assert_eq!(s.rtp_addr(), "203.0.113.5");
    let m = &s.media().unwrap()[0];
    // our preference order wins: the working codec is mulaw
    assert_eq!(m.fmt_list(), "mulaw,alaw");
    assert_eq!(m.format(), "mulaw");
    assert_eq!(m.remote_port(), 49172);
}

#[test]
fn test_update_from_sdp_fresh_media_uses_remote_order() {
    let mut s = session();
    assert!(s.update_from_sdp(ANSWER));
    let m = &s.media().unwrap()[0];
    assert_eq!(m.fmt_list(), "alaw,mulaw");
    assert_eq!(m.format(), "alaw");
}

#[test]
fn test_update_from_sdp_preserves_local_state() {
    let mut s = super::secure_session();
    let mut media = SdpMedia::new("audio", "RTP/AVP", "mulaw,alaw");
    media.set_local_port(5004);
    media.crypto("1 AES_CM_128_HMAC_SHA1_80 inline:LOCALKEY", false);
    s.set_media(Some(vec![media]));
    s.set_local_rtp_changed(false);
    let answer = "v=0\r\nc=IN IP4 203.0.113.5\r\n\
        m=audio 49172 RTP/AVP 0\r\n\
        a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:REMOTEKEY\r\n";
    assert!(s.update_from_sdp(answer));
    let m = &s.media().unwrap()[0];
    // the reused descriptor keeps its local half and gains the remote one
    assert_eq!(m.local_crypto(), "1 AES_CM_128_HMAC_SHA1_80 inline:LOCALKEY");
    assert_eq!(m.remote_crypto(), "1 AES_CM_128_HMAC_SHA1_80 inline:REMOTEKEY");
    assert_eq!(m.local_port(), 5004);
}
