//! ISUP codec tests: labels, point codes, digits and the IAM round trip.

use super::sample_iam;
use crate::isup::codec::{
    create_msu, decode_message, encode_message, parse_point_code, LabelKind, Ss7Label, MSG_IAM,
    SIF_ISUP,
};
use crate::party::AppMessage;
use std::collections::BTreeSet;

#[test]
fn test_itu_label_roundtrip() {
    let label = Ss7Label::new(LabelKind::Itu, 0x1234 & 0x3fff, 0x2e9, 11);
    let mut buf = Vec::new();
    label.write(&mut buf);
    assert_eq!(buf.len(), 4);
    let parsed = Ss7Label::parse(LabelKind::Itu, &buf).unwrap();
    assert_eq!(parsed, label);
}

#[test]
fn test_ansi_label_roundtrip() {
    let label = Ss7Label::new(LabelKind::Ansi, 0x0a0b0c, 0x0d0e0f, 17);
    let mut buf = Vec::new();
    label.write(&mut buf);
    assert_eq!(buf.len(), 7);
    let parsed = Ss7Label::parse(LabelKind::Ansi, &buf).unwrap();
    assert_eq!(parsed, label);
}

#[test]
fn test_short_label_rejected() {
    assert!(Ss7Label::parse(LabelKind::Itu, &[1, 2, 3]).is_none());
    assert!(Ss7Label::parse(LabelKind::Ansi, &[1, 2, 3, 4, 5, 6]).is_none());
}

#[test]
fn test_point_code_forms() {
    assert_eq!(parse_point_code(LabelKind::Itu, "4106"), Some(4106));
    // ITU 3-8-3: 2-2-2 -> 2<<11 | 2<<3 | 2
    assert_eq!(parse_point_code(LabelKind::Itu, "2-2-2"), Some(4114));
    // ANSI 8-8-8
    assert_eq!(parse_point_code(LabelKind::Ansi, "1-2-3"), Some(0x010203));
    assert_eq!(parse_point_code(LabelKind::Itu, "bogus"), None);
}

fn params_set(params: &AppMessage) -> BTreeSet<(String, String)> {
    params
        .params()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_iam_roundtrip() {
    let params = sample_iam();
    let encoded = encode_message(&params, MSG_IAM).unwrap();
    let mut decoded = AppMessage::new("IAM");
    assert!(decode_message(&mut decoded, MSG_IAM, &encoded));
    assert_eq!(params_set(&params), params_set(&decoded));
}

#[test]
fn test_iam_roundtrip_with_optional_params() {
    let mut params = sample_iam();
    params.add_param("CallingPartyNumber", "498912345");
    params.add_param("CallingPartyNumber.nature", "international");
    params.add_param("CallingPartyNumber.plan", "isdn");
    params.add_param("CallingPartyNumber.restrict", "restricted");
    params.add_param("CallingPartyNumber.screened", "network-provided");
    params.add_param("CallingPartyNumber.complete", "true");
    params.add_param("Parameter_0x1d", "8090");
    let encoded = encode_message(&params, MSG_IAM).unwrap();
    let mut decoded = AppMessage::new("IAM");
    assert!(decode_message(&mut decoded, MSG_IAM, &encoded));
    assert_eq!(params_set(&params), params_set(&decoded));
}

#[test]
fn test_odd_digit_count_roundtrip() {
    let mut params = sample_iam();
    params.set_param("CalledPartyNumber", "555#12*34");
    let encoded = encode_message(&params, MSG_IAM).unwrap();
    let mut decoded = AppMessage::new("IAM");
    assert!(decode_message(&mut decoded, MSG_IAM, &encoded));
    assert_eq!(decoded.get_value("CalledPartyNumber"), Some("555#12*34"));
}

#[test]
fn test_unknown_type_not_encoded() {
    let params = sample_iam();
    assert!(encode_message(&params, 0x06).is_err());
    let mut decoded = AppMessage::new("ACM");
    assert!(!decode_message(&mut decoded, 0x06, &[0x11]));
}

#[test]
fn test_truncated_iam_rejected() {
    let params = sample_iam();
    let encoded = encode_message(&params, MSG_IAM).unwrap();
    for cut in [0, 3, 6, encoded.len() - 1] {
        let mut decoded = AppMessage::new("IAM");
        assert!(
            !decode_message(&mut decoded, MSG_IAM, &encoded[..cut]),
            "accepted a message cut at {}",
            cut
        );
    }
}

#[test]
fn test_create_msu_layout() {
    let params = sample_iam();
    let label = Ss7Label::new(LabelKind::Itu, 100, 200, 5);
    let msu = create_msu(MSG_IAM, 0x80, &label, 0x1234, &params).unwrap();
    assert_eq!(msu.sif(), SIF_ISUP);
    assert_eq!(msu.ssf(), 0x80);
    // label, then CIC little-endian, then the type byte
    assert_eq!(Ss7Label::parse(LabelKind::Itu, &msu.data).unwrap(), label);
    assert_eq!(msu.data[4], 0x34);
    assert_eq!(msu.data[5], 0x12);
    assert_eq!(msu.data[6], MSG_IAM);
    let mut decoded = AppMessage::new("IAM");
    assert!(decode_message(&mut decoded, MSG_IAM, &msu.data[7..]));
    assert_eq!(decoded.get_value("CalledPartyNumber"), Some("15551234"));
}
