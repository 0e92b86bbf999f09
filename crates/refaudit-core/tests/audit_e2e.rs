//! End-to-end audit scenarios: whole event streams through the auditor,
//! link payload sequences through the reconciler, and snapshot checks,
//! asserting on the final report.

use std::collections::BTreeMap;

use refaudit_core::{
    AuditEvent, Auditor, CollectionOrdinalIndex, Delivery, Direction, EventKind, GcAction,
    GlobalRef, Leak, LinkMessage, LinkPayload, LocalRef, ReachabilityState, RemoteLink,
    ReportBuilder, SlotPair, Syscall, VatId, Violation,
};

fn pair(local: LocalRef, global: GlobalRef) -> SlotPair {
    SlotPair::new(local, global)
}

/// A full clean lifecycle of one export: introduced, dropped, retired,
/// leaving no entry and no violations.
#[test]
fn export_lifecycle_ends_clean() {
    let slot = pair(LocalRef::object_export(5), GlobalRef::object(50));
    let events = vec![
        AuditEvent::new("v1", 1, EventKind::Creation { slot }),
        AuditEvent::new(
            "v1",
            2,
            EventKind::Delivery(Delivery::DropExports { slots: vec![slot] }),
        ),
        AuditEvent::new(
            "v1",
            3,
            EventKind::Syscall(Syscall::RetireExports { slots: vec![slot] }),
        ),
    ];

    let mut auditor = Auditor::new();
    for event in &events {
        auditor.observe(event).unwrap();
    }

    assert!(auditor.violations().is_empty());
    assert!(auditor.table(&VatId::from("v1")).unwrap().is_empty());

    let report = auditor.report();
    assert!(report.violations.is_empty());
    assert!(report.leaked_refs.is_empty());
    assert!(report.earliest_safe_drop.is_empty());
}

/// A drop with no prior introduce is one invalid-drop violation and leaves
/// the table unchanged.
#[test]
fn stray_drop_is_one_violation() {
    let slot = pair(LocalRef::object_export(7), GlobalRef::object(70));
    let report = Auditor::new().run(vec![AuditEvent::new(
        "v1",
        1,
        EventKind::Delivery(Delivery::DropExports { slots: vec![slot] }),
    )]);

    assert_eq!(report.violations.len(), 1);
    assert!(matches!(
        report.violations[0],
        Violation::InvalidDrop {
            actual: None,
            seq: 1,
            ..
        }
    ));
    assert!(report.earliest_safe_drop.is_empty());
}

/// A consistent ordinal-indexed collection checks clean.
#[test]
fn consistent_collection_has_no_violations() {
    let mut index = CollectionOrdinalIndex::new("d1");
    index.ordinal_assignments.insert("o+d1/2:1".to_string(), 3);
    index.data_keys.insert((3, "o+d1/2:1".to_string()));
    index.entry_count = 1;

    assert!(index.check().is_empty());
}

/// The same collection with a wrong stored count reports exactly a count
/// mismatch.
#[test]
fn wrong_count_reports_count_mismatch() {
    let mut index = CollectionOrdinalIndex::new("d1");
    index.ordinal_assignments.insert("o+d1/2:1".to_string(), 3);
    index.data_keys.insert((3, "o+d1/2:1".to_string()));
    index.entry_count = 2;

    let violations = index.check();
    assert_eq!(violations.len(), 1);
    assert!(matches!(
        violations[0],
        Violation::CountMismatch {
            stored: 2,
            actual: 1,
            ..
        }
    ));
}

/// A sent export that the peer later drops (in the peer's polarity) ends
/// up recognizable on the sending side of the link.
#[test]
fn peer_drop_of_sent_reference_is_recognizable() {
    let mut link = RemoteLink::new("v1", "v7");

    link.observe(
        Direction::Tx,
        &LinkPayload::new(vec![LinkMessage::Deliver {
            target: LocalRef::object_import(9),
            slots: vec![LocalRef::object_export(3)],
            result: None,
        }]),
        1,
    );
    link.observe(
        Direction::Rx,
        &LinkPayload::new(vec![LinkMessage::Gc {
            action: GcAction::DropExport,
            refs: vec![LocalRef::object_import(3)],
        }]),
        2,
    );

    assert!(link.violations().is_empty());
    assert_eq!(
        link.export(&LocalRef::object_export(3)).unwrap().state,
        ReachabilityState::Recognizable
    );
}

/// An object exported to two peers has independent bookkeeping per link.
#[test]
fn links_do_not_conflate_per_peer_state() {
    let payload = LinkPayload::new(vec![LinkMessage::Deliver {
        target: LocalRef::object_import(1),
        slots: vec![LocalRef::object_export(3)],
        result: None,
    }]);
    let mut to_v7 = RemoteLink::new("v1", "v7");
    let mut to_v8 = RemoteLink::new("v1", "v8");
    to_v7.observe(Direction::Tx, &payload, 1);
    to_v8.observe(Direction::Tx, &payload, 2);

    // Only v7 drops its import.
    to_v7.observe(
        Direction::Rx,
        &LinkPayload::new(vec![LinkMessage::Gc {
            action: GcAction::DropExport,
            refs: vec![LocalRef::object_import(3)],
        }]),
        3,
    );

    assert_eq!(
        to_v7.export(&LocalRef::object_export(3)).unwrap().state,
        ReachabilityState::Recognizable
    );
    assert_eq!(
        to_v8.export(&LocalRef::object_export(3)).unwrap().state,
        ReachabilityState::Reachable
    );
}

/// An export nobody ever imported is flagged; one that reached a still-
/// reachable importer is not.
#[test]
fn leak_findings_respect_importers() {
    let dead = pair(LocalRef::object_export(1), GlobalRef::object(100));
    let alive = pair(LocalRef::object_export(2), GlobalRef::object(101));

    let events = vec![
        AuditEvent::new("v1", 1, EventKind::Creation { slot: dead }),
        AuditEvent::new("v1", 2, EventKind::Creation { slot: alive }),
        // ko101 travels to v2 and stays reachable there.
        AuditEvent::new(
            "v1",
            3,
            EventKind::Syscall(Syscall::Send {
                target: pair(LocalRef::object_import(5), GlobalRef::object(102)),
                slots: vec![alive],
                result: None,
            }),
        ),
        AuditEvent::new(
            "v2",
            4,
            EventKind::Delivery(Delivery::Message {
                target: pair(LocalRef::object_import(6), GlobalRef::object(102)),
                slots: vec![pair(LocalRef::object_import(7), GlobalRef::object(101))],
                result: None,
            }),
        ),
    ];

    let report = Auditor::new().run(events);
    assert_eq!(
        report.leaked_refs,
        vec![Leak::UnreferencedButRetained {
            global_ref: GlobalRef::object(100),
            owner: VatId::from("v1"),
            last_cited_at: 1,
        }]
    );
}

/// The drop schedule answers when each surviving reference was last cited.
#[test]
fn drop_schedule_tracks_last_citations() {
    let k = GlobalRef::object(200);
    let export = pair(LocalRef::object_export(1), k);
    let import = pair(LocalRef::object_import(4), k);

    let events = vec![
        AuditEvent::new("v1", 1, EventKind::Creation { slot: export }),
        AuditEvent::new(
            "v2",
            5,
            EventKind::Delivery(Delivery::Message {
                target: import,
                slots: vec![],
                result: None,
            }),
        ),
        // v2 cites it again later.
        AuditEvent::new(
            "v2",
            9,
            EventKind::Syscall(Syscall::Send {
                target: import,
                slots: vec![],
                result: None,
            }),
        ),
    ];

    let report = Auditor::new().run(events);
    assert_eq!(report.earliest_safe_drop.get(&k), Some(&9));
}

/// A combined report merges stream, link, and snapshot findings in order.
#[test]
fn combined_report_is_ordered_and_deterministic() {
    let mut auditor = Auditor::new();
    let slot = pair(LocalRef::object_export(7), GlobalRef::object(70));
    let _ = auditor.observe(&AuditEvent::new(
        "v1",
        4,
        EventKind::Delivery(Delivery::DropExports { slots: vec![slot] }),
    ));

    let mut link = RemoteLink::new("v1", "v7");
    link.observe(
        Direction::Rx,
        &LinkPayload::new(vec![LinkMessage::Gc {
            action: GcAction::RetireExport,
            refs: vec![LocalRef::object_import(2)],
        }]),
        2,
    );

    let mut snapshot = BTreeMap::new();
    snapshot.insert("vc.3.|entryCount".to_string(), "1".to_string());
    let parsed = refaudit_core::parse_snapshot("3", &snapshot);

    let build = || {
        let stream_report = auditor.report();
        ReportBuilder::new()
            .with_violations(stream_report.violations.clone())
            .with_link(&link)
            .with_violations(parsed.index.check())
            .finish()
    };

    let report = build();
    assert_eq!(report.violations.len(), 3);
    // Link violation at seq 2, stream violation at seq 4, snapshot last.
    assert!(matches!(report.violations[0], Violation::UnknownRetire { seq: 2, .. }));
    assert!(matches!(report.violations[1], Violation::InvalidDrop { seq: 4, .. }));
    assert!(matches!(report.violations[2], Violation::CountMismatch { .. }));

    let again = build();
    assert_eq!(report, again);
    assert_eq!(
        serde_json::to_vec(&report).unwrap(),
        serde_json::to_vec(&again).unwrap()
    );
}
