//! Tests for the full-stream auditor driver.

use super::*;
use crate::event::Resolution;
use crate::refs::{GlobalRef, LocalRef};

fn pair(local: LocalRef, global: GlobalRef) -> SlotPair {
    SlotPair::new(local, global)
}

fn message(participant: &str, seq: u64, target: SlotPair, slots: Vec<SlotPair>) -> AuditEvent {
    AuditEvent::new(
        participant,
        seq,
        EventKind::Delivery(Delivery::Message {
            target,
            slots,
            result: None,
        }),
    )
}

#[test]
fn delivery_populates_table_and_ledger() {
    let mut auditor = Auditor::new();
    let target = pair(LocalRef::object_import(1), GlobalRef::object(20));
    let slot = pair(LocalRef::object_import(2), GlobalRef::object(21));

    auditor
        .observe(&message("v2", 1, target, vec![slot]))
        .unwrap();

    let table = auditor.table(&VatId::from("v2")).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(
        auditor.ledger().who_retains(&GlobalRef::object(21)),
        vec![(VatId::from("v2"), ReachabilityState::Reachable)]
    );
}

#[test]
fn export_citation_registers_ownership() {
    let mut auditor = Auditor::new();
    let slot = pair(LocalRef::object_export(4), GlobalRef::object(30));
    auditor
        .observe(&AuditEvent::new("v1", 1, EventKind::Creation { slot }))
        .unwrap();

    assert_eq!(
        auditor.ledger().owner(&GlobalRef::object(30)),
        Some(&VatId::from("v1"))
    );
    // An exporter's own entry contributes no importer count.
    assert!(auditor.ledger().who_retains(&GlobalRef::object(30)).is_empty());
}

#[test]
fn malformed_event_is_skipped_and_stream_continues() {
    let mut auditor = Auditor::new();
    // Object vref paired with a promise kref.
    let bad = pair(LocalRef::object_import(1), GlobalRef::promise(9));
    let err = auditor
        .observe(&message("v2", 1, bad, vec![]))
        .unwrap_err();
    assert!(matches!(err, MalformedInput::KindMismatch { .. }));
    assert_eq!(auditor.skipped().len(), 1);
    assert!(auditor.table(&VatId::from("v2")).is_none());

    // The next event processes normally.
    let good = pair(LocalRef::object_import(1), GlobalRef::object(9));
    auditor.observe(&message("v2", 2, good, vec![])).unwrap();
    assert_eq!(auditor.table(&VatId::from("v2")).unwrap().len(), 1);
}

#[test]
fn drop_and_retire_mirror_into_ledger() {
    let mut auditor = Auditor::new();
    let k = GlobalRef::object(40);
    let slot = pair(LocalRef::object_import(3), k);
    auditor.observe(&message("v2", 1, slot, vec![])).unwrap();

    auditor
        .observe(&AuditEvent::new(
            "v2",
            2,
            EventKind::Syscall(Syscall::DropImports { slots: vec![slot] }),
        ))
        .unwrap();
    assert_eq!(
        auditor.ledger().who_retains(&k),
        vec![(VatId::from("v2"), ReachabilityState::Recognizable)]
    );

    auditor
        .observe(&AuditEvent::new(
            "v2",
            3,
            EventKind::Syscall(Syscall::RetireImports { slots: vec![slot] }),
        ))
        .unwrap();
    assert!(auditor.ledger().who_retains(&k).is_empty());
    assert!(auditor.violations().is_empty());
}

#[test]
fn promise_resolution_clears_importer_contribution() {
    let mut auditor = Auditor::new();
    let kp = GlobalRef::promise(50);
    let subject = pair(LocalRef::promise_import(5), kp);
    auditor
        .observe(&AuditEvent::new(
            "v2",
            1,
            EventKind::Syscall(Syscall::Subscribe { target: subject }),
        ))
        .unwrap();
    assert_eq!(auditor.ledger().who_retains(&kp).len(), 1);

    auditor
        .observe(&AuditEvent::new(
            "v2",
            2,
            EventKind::Delivery(Delivery::Notify {
                resolutions: vec![Resolution {
                    subject,
                    rejected: false,
                    slots: vec![],
                }],
            }),
        ))
        .unwrap();
    assert!(auditor.ledger().who_retains(&kp).is_empty());
    assert!(auditor.table(&VatId::from("v2")).unwrap().is_empty());
}

#[test]
fn use_after_drop_is_recorded_and_counts_move() {
    let mut auditor = Auditor::new();
    let k = GlobalRef::object(60);
    let slot = pair(LocalRef::object_import(6), k);
    auditor.observe(&message("v2", 1, slot, vec![])).unwrap();
    auditor
        .observe(&AuditEvent::new(
            "v2",
            2,
            EventKind::Syscall(Syscall::DropImports { slots: vec![slot] }),
        ))
        .unwrap();

    // The vat keeps using the dropped import.
    auditor.observe(&message("v2", 3, slot, vec![])).unwrap();

    assert_eq!(auditor.violations().len(), 1);
    assert!(matches!(
        auditor.violations()[0],
        Violation::UseAfterDrop { seq: 3, .. }
    ));
    assert_eq!(
        auditor.ledger().who_retains(&k),
        vec![(VatId::from("v2"), ReachabilityState::Reachable)]
    );
}

#[test]
fn run_reports_leaked_exports() {
    let exported = pair(LocalRef::object_export(7), GlobalRef::object(70));
    let events = vec![
        AuditEvent::new("v1", 1, EventKind::Creation { slot: exported }),
        // Unrelated activity; nothing ever imports ko70.
        message(
            "v2",
            2,
            pair(LocalRef::object_import(1), GlobalRef::object(71)),
            vec![],
        ),
    ];

    let report = Auditor::new().run(events);
    assert_eq!(report.leaked_refs.len(), 1);
    assert!(matches!(
        report.leaked_refs[0],
        crate::violation::Leak::UnreferencedButRetained {
            global_ref: GlobalRef { ordinal: 70, .. },
            ..
        }
    ));
}

#[test]
fn in_flight_send_suppresses_leak_until_delivered() {
    let k = GlobalRef::object(80);
    let export = pair(LocalRef::object_export(8), k);
    let mut auditor = Auditor::new();
    auditor
        .observe(&AuditEvent::new("v1", 1, EventKind::Creation { slot: export }))
        .unwrap();
    auditor
        .observe(&AuditEvent::new(
            "v1",
            2,
            EventKind::Syscall(Syscall::Send {
                target: pair(LocalRef::object_import(1), GlobalRef::object(81)),
                slots: vec![export],
                result: None,
            }),
        ))
        .unwrap();

    // The citation is still travelling: not a leak yet.
    assert!(auditor.report().leaked_refs.is_empty());

    // It arrives at v2, which then holds a reachable import: still no leak.
    auditor
        .observe(&message(
            "v2",
            3,
            pair(LocalRef::object_import(9), GlobalRef::object(81)),
            vec![pair(LocalRef::object_import(10), k)],
        ))
        .unwrap();
    assert!(auditor.report().leaked_refs.is_empty());
}

#[test]
fn partial_reports_are_stable() {
    let mut auditor = Auditor::new();
    auditor
        .observe(&message(
            "v2",
            1,
            pair(LocalRef::object_import(1), GlobalRef::object(90)),
            vec![],
        ))
        .unwrap();

    let a = auditor.report();
    let b = auditor.report();
    assert_eq!(a, b);
    assert_eq!(
        serde_json::to_vec(&a).unwrap(),
        serde_json::to_vec(&b).unwrap()
    );
}

#[test]
fn completion_errors_touch_no_state() {
    let mut auditor = Auditor::new();
    auditor
        .observe(&AuditEvent::new(
            "v1",
            1,
            EventKind::DeliveryResult(CompletionStatus::Error {
                message: "vat terminated".to_string(),
            }),
        ))
        .unwrap();
    assert!(auditor.violations().is_empty());
    assert!(auditor.table(&VatId::from("v1")).is_none());
}
