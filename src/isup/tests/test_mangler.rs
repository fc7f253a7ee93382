//! Intercept unit and mangler tests: acceptance, the mangle round trip and
//! reconfiguration.

use super::{sample_iam, unit_config, MangleDispatcher, MockSs7};
use crate::isup::codec::{create_msu, decode_message, LabelKind, Ss7Label, MSG_IAM};
use crate::isup::{HandledMsu, IsupIntercept, IsupMangler, Ss7Layer};
use crate::party::{AppMessage, Dispatcher};
use std::sync::Arc;

fn iam_msu(label: &Ss7Label, cic: u16) -> crate::isup::Msu {
    create_msu(MSG_IAM, 0x80, label, cic, &sample_iam()).unwrap()
}

#[test]
fn test_iam_mangle_roundtrip() {
    let ss7 = MockSs7::new();
    let unit = IsupIntercept::new("unit1", &unit_config("unit1"), ss7.clone());
    let dispatcher: Arc<dyn Dispatcher> =
        MangleDispatcher::rewriting("CalledPartyNumber", "16661234");
    let label = Ss7Label::new(LabelKind::Itu, 100, 200, 5);
    let msu = iam_msu(&label, 100);
    assert_eq!(
        unit.received_msu(&msu, &label, 5, &dispatcher),
        HandledMsu::Accepted
    );
    let sent = ss7.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (out, out_label, out_sls) = &sent[0];
    // label, SLS, CIC and type are preserved
    assert_eq!(*out_label, label);
    assert_eq!(*out_sls, 5);
    assert_eq!(out.ssf(), 0x80);
    let tail = &out.data[label.length()..];
    assert_eq!(u16::from(tail[0]) | u16::from(tail[1]) << 8, 100);
    assert_eq!(tail[2], MSG_IAM);
    // the body carries the rewritten called number
    let mut decoded = AppMessage::new("IAM");
    assert!(decode_message(&mut decoded, MSG_IAM, &tail[3..]));
    assert_eq!(decoded.get_value("CalledPartyNumber"), Some("16661234"));
    assert_eq!(
        decoded.get_value("CalledPartyNumber.nature"),
        Some("national")
    );
}

#[test]
fn test_mangle_message_fields() {
    let ss7 = MockSs7::new();
    let unit = IsupIntercept::new("unit1", &unit_config("unit1"), ss7);
    let dispatcher = MangleDispatcher::rewriting("CalledPartyNumber", "16661234");
    let as_dyn: Arc<dyn Dispatcher> = dispatcher.clone();
    let label = Ss7Label::new(LabelKind::Itu, 100, 200, 9);
    let msu = iam_msu(&label, 42);
    unit.received_msu(&msu, &label, 9, &as_dyn);
    let seen = dispatcher.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].name, "isup.mangle");
    assert_eq!(seen[0].get_value("address"), Some("unit1/42"));
    assert_eq!(seen[0].get_value("sls"), Some("9"));
    assert_eq!(seen[0].get_value("CalledPartyNumber"), Some("15551234"));
}

#[test]
fn test_declined_dispatch_still_forwards() {
    let ss7 = MockSs7::new();
    let unit = IsupIntercept::new("unit1", &unit_config("unit1"), ss7.clone());
    let dispatcher: Arc<dyn Dispatcher> = MangleDispatcher::declining();
    let label = Ss7Label::new(LabelKind::Itu, 100, 200, 5);
    unit.received_msu(&iam_msu(&label, 7), &label, 5, &dispatcher);
    // not accepted behaves as a no-op passthrough
    let sent = ss7.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let tail = &sent[0].0.data[label.length()..];
    let mut decoded = AppMessage::new("IAM");
    assert!(decode_message(&mut decoded, MSG_IAM, &tail[3..]));
    assert_eq!(decoded.get_value("CalledPartyNumber"), Some("15551234"));
}

#[test]
fn test_acceptance_rules() {
    let ss7 = MockSs7::new();
    let dispatcher: Arc<dyn Dispatcher> =
        MangleDispatcher::rewriting("CalledPartyNumber", "1666");
    let unit = IsupIntercept::new("unit1", &unit_config("unit1"), ss7.clone());
    // wrong destination
    let label = Ss7Label::new(LabelKind::Itu, 101, 200, 5);
    assert_eq!(
        unit.received_msu(&iam_msu(&label, 1), &label, 5, &dispatcher),
        HandledMsu::Rejected
    );
    // reverse direction needs the symmetric flag
    let reverse = Ss7Label::new(LabelKind::Itu, 200, 100, 5);
    assert_eq!(
        unit.received_msu(&iam_msu(&reverse, 1), &reverse, 5, &dispatcher),
        HandledMsu::Rejected
    );
    let mut cfg = unit_config("unit1");
    cfg.add_param("symmetric", "yes");
    unit.initialize(&cfg);
    assert_eq!(
        unit.received_msu(&iam_msu(&reverse, 1), &reverse, 5, &dispatcher),
        HandledMsu::Accepted
    );
    // non-ISUP traffic is not ours
    let label = Ss7Label::new(LabelKind::Itu, 100, 200, 5);
    let mut msu = iam_msu(&label, 1);
    msu.sio = 0x83; // SCCP
    assert_eq!(
        unit.received_msu(&msu, &label, 5, &dispatcher),
        HandledMsu::Rejected
    );
}

#[test]
fn test_non_intercepted_type_passes_through() {
    let ss7 = MockSs7::new();
    let unit = IsupIntercept::new("unit1", &unit_config("unit1"), ss7.clone());
    let dispatcher: Arc<dyn Dispatcher> =
        MangleDispatcher::rewriting("CalledPartyNumber", "1666");
    let label = Ss7Label::new(LabelKind::Itu, 100, 200, 5);
    // hand-built REL: CIC 9, type 0x0c, no parameters decoded
    let mut data = Vec::new();
    label.write(&mut data);
    data.extend_from_slice(&[9, 0, 0x0c, 0x02, 0x00, 0x02, 0x80, 0x90]);
    let msu = crate::isup::Msu::new(0x85, data);
    assert_eq!(
        unit.received_msu(&msu, &label, 5, &dispatcher),
        HandledMsu::Rejected
    );
    assert!(ss7.sent.lock().unwrap().is_empty());
}

#[test]
fn test_short_msu_rejected() {
    let ss7 = MockSs7::new();
    let unit = IsupIntercept::new("unit1", &unit_config("unit1"), ss7);
    let dispatcher: Arc<dyn Dispatcher> =
        MangleDispatcher::rewriting("CalledPartyNumber", "1666");
    let label = Ss7Label::new(LabelKind::Itu, 100, 200, 5);
    let mut data = Vec::new();
    label.write(&mut data);
    data.push(9); // only one byte of CIC
    let msu = crate::isup::Msu::new(0x85, data);
    assert_eq!(
        unit.received_msu(&msu, &label, 5, &dispatcher),
        HandledMsu::Rejected
    );
}

#[test]
fn test_transmit_failure_is_swallowed() {
    let mut ss7 = MockSs7::new();
    Arc::get_mut(&mut ss7).unwrap().fail = true;
    let layer: Arc<dyn Ss7Layer> = ss7;
    let unit = IsupIntercept::new("unit1", &unit_config("unit1"), layer);
    let dispatcher: Arc<dyn Dispatcher> =
        MangleDispatcher::rewriting("CalledPartyNumber", "1666");
    let label = Ss7Label::new(LabelKind::Itu, 100, 200, 5);
    // the dispatch succeeded, the forward failure is only logged
    assert_eq!(
        unit.received_msu(&iam_msu(&label, 3), &label, 5, &dispatcher),
        HandledMsu::Accepted
    );
}

#[test]
fn test_mangler_reconfiguration() {
    let ss7: Arc<dyn Ss7Layer> = MockSs7::new();
    let mangler = IsupMangler::new();
    mangler.initialize(&[unit_config("east"), unit_config("west")], &ss7);
    assert_eq!(mangler.unit_count(), 2);
    let east = mangler.find("east").unwrap();
    // a reconfiguration without "west" drops it and reuses "east"
    mangler.initialize(&[unit_config("east")], &ss7);
    assert_eq!(mangler.unit_count(), 1);
    assert!(mangler.find("west").is_none());
    assert!(Arc::ptr_eq(&east, &mangler.find("east").unwrap()));
    // disabled sections are ignored
    let mut disabled = unit_config("east");
    disabled.add_param("enable", "no");
    mangler.initialize(&[disabled], &ss7);
    assert_eq!(mangler.unit_count(), 0);
}

#[test]
fn test_mangler_routes_to_accepting_unit() {
    let ss7: Arc<dyn Ss7Layer> = MockSs7::new();
    let mangler = IsupMangler::new();
    let mut far = AppMessage::new("far");
    far.add_param("pointcode", "300");
    far.add_param("remotepointcode", "400");
    mangler.initialize(&[far, unit_config("near")], &ss7);
    let dispatcher: Arc<dyn Dispatcher> =
        MangleDispatcher::rewriting("CalledPartyNumber", "1666");
    let label = Ss7Label::new(LabelKind::Itu, 100, 200, 5);
    assert_eq!(
        mangler.handle_msu(&iam_msu(&label, 1), &label, 5, &dispatcher),
        HandledMsu::Accepted
    );
    let nowhere = Ss7Label::new(LabelKind::Itu, 1, 2, 5);
    assert_eq!(
        mangler.handle_msu(&iam_msu(&nowhere, 1), &nowhere, 5, &dispatcher),
        HandledMsu::Rejected
    );
}
