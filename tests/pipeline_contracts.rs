mod common;

use common::{seeded_remote, state_of, workspace};
use serde_json::json;
use shadow_mirror_lib::commands::db::{append_snapshot, count_all, latest_good};
use shadow_mirror_lib::commands::export::read_export;
use shadow_mirror_lib::models::report::{CycleOutcome, RestoreAction};
use shadow_mirror_lib::models::snapshot::NewSnapshot;
use shadow_mirror_lib::remote::MemoryRemote;
use shadow_mirror_lib::{
    restore_from_export, restore_from_store, run_backup_cycle, RestoreOptions, ShadowError,
};

fn restore_options(user: &str) -> RestoreOptions {
    RestoreOptions {
        target_user_id: Some(user.to_string()),
        ..RestoreOptions::default()
    }
}

#[tokio::test]
async fn large_drop_is_blocked_and_previous_snapshot_stays_latest_good() {
    let ws = workspace();
    let remote = seeded_remote(120, 8);

    let first = run_backup_cycle(&ws.config, &remote, &ws.conn, 1_000, false)
        .await
        .expect("first cycle");
    let CycleOutcome::Completed { snapshot_id, .. } = first else {
        panic!("first cycle should complete: {first:?}");
    };
    let export_before = std::fs::read_to_string(ws.config.export_path()).expect("export written");

    // Simulate a remote that lost most tasks.
    let degraded = seeded_remote(3, 8);
    let second = run_backup_cycle(&ws.config, &degraded, &ws.conn, 2_000, false)
        .await
        .expect("second cycle");

    match &second {
        CycleOutcome::GuardBlocked {
            previous_counts,
            new_counts,
            reason,
        } => {
            assert_eq!(previous_counts["tasks"], 120);
            assert_eq!(new_counts["tasks"], 3);
            assert_eq!(new_counts["groups"], 8);
            assert!(reason.contains("120 -> 3"));
        }
        other => panic!("expected guard block, got {other:?}"),
    }

    assert_eq!(count_all(&ws.conn).expect("count"), 1);
    let good = latest_good(&ws.conn).expect("query").expect("good snapshot");
    assert_eq!(good.id, snapshot_id);
    assert_eq!(good.item_count, 120 + 8 + 1);
    assert_eq!(
        std::fs::read_to_string(ws.config.export_path()).expect("export"),
        export_before
    );
}

#[tokio::test]
async fn completed_cycle_writes_matching_snapshot_and_export() {
    let ws = workspace();
    let remote = seeded_remote(10, 2);

    let outcome = run_backup_cycle(&ws.config, &remote, &ws.conn, 5_000, false)
        .await
        .expect("cycle");
    let CycleOutcome::Completed { checksum, counts, .. } = outcome else {
        panic!("expected completion");
    };

    let doc = read_export(&ws.config.export_path()).expect("valid export");
    assert_eq!(doc.checksum, checksum);
    assert_eq!(doc.meta.counts, counts);
    assert_eq!(doc.meta.timestamp, 5_000);
    assert_eq!(latest_good(&ws.conn).unwrap().unwrap().checksum, checksum);
}

#[tokio::test]
async fn orphaned_child_group_is_restored_as_root() {
    let ws = workspace();
    let source = MemoryRemote::new();
    source.insert("projects", json!({ "id": "p-1", "user_id": "u-1" }));
    source.insert("groups", json!({ "id": "g-root", "project_id": "p-1", "parent_group_id": null, "user_id": "u-1" }));
    source.insert("groups", json!({ "id": "g-child", "project_id": "p-1", "parent_group_id": "g-root", "user_id": "u-1" }));
    source.insert("tasks", json!({ "id": "t-1", "group_id": "g-child", "project_id": "p-1", "user_id": "u-1" }));
    run_backup_cycle(&ws.config, &source, &ws.conn, 1_000, false)
        .await
        .expect("capture");

    // The parent group is tombstoned on the target, so the child loses it.
    let target = MemoryRemote::new();
    target.insert("tombstones", json!({ "entity_type": "group", "entity_id": "g-root" }));

    let report = restore_from_store(&ws.config, &target, &ws.conn, &restore_options("u-2"))
        .await
        .expect("restore");

    let groups = &report.tallies["groups"];
    assert_eq!(groups.skipped_tombstoned, 1);
    assert_eq!(groups.restored, 1);
    assert_eq!(groups.reference_nulled, 1);
    assert_eq!(groups.failed, 0);

    let child = target.row("groups", "g-child").expect("child restored");
    assert_eq!(child["parent_group_id"], serde_json::Value::Null);
    assert_eq!(child["user_id"], json!("u-2"));
    assert!(target.row("groups", "g-root").is_none());
    assert!(target.row("tasks", "t-1").is_some());
}

#[tokio::test]
async fn restore_twice_leaves_identical_state() {
    let ws = workspace();
    let source = seeded_remote(25, 4);
    source.insert("groups", json!({ "id": "g-nested", "project_id": "p-1", "parent_group_id": "g-000", "user_id": "u-1" }));
    source.insert("tasks", json!({ "id": "t-sub", "project_id": "p-1", "parent_task_id": "t-0001", "user_id": "u-1" }));
    source.insert("tasks", json!({ "id": "t-orphan", "project_id": "p-missing", "user_id": "u-1" }));
    run_backup_cycle(&ws.config, &source, &ws.conn, 1_000, false)
        .await
        .expect("capture");

    let target = MemoryRemote::new();
    let first = restore_from_store(&ws.config, &target, &ws.conn, &restore_options("u-9"))
        .await
        .expect("first restore");
    let after_first = state_of(&target);

    let second = restore_from_store(&ws.config, &target, &ws.conn, &restore_options("u-9"))
        .await
        .expect("second restore");
    let after_second = state_of(&target);

    assert_eq!(after_first, after_second);
    assert_eq!(first.total_failed(), 0);
    assert_eq!(first.tallies, second.tallies);
    assert_eq!(target.rows("tasks").len(), 27);
    assert_eq!(target.rows("groups").len(), 5);
    assert_eq!(target.rows("projects").len(), 1);
}

#[tokio::test]
async fn tombstoned_records_are_written_only_when_filter_is_skipped() {
    let ws = workspace();
    let source = seeded_remote(6, 0);
    run_backup_cycle(&ws.config, &source, &ws.conn, 1_000, false)
        .await
        .expect("capture");

    let filtered_target = MemoryRemote::new();
    filtered_target.insert("tombstones", json!({ "id": 1, "entity_type": "task", "entity_id": "t-0002" }));
    let report = restore_from_store(&ws.config, &filtered_target, &ws.conn, &restore_options("u-1"))
        .await
        .expect("filtered restore");
    assert_eq!(report.tallies["tasks"].skipped_tombstoned, 1);
    assert!(filtered_target.row("tasks", "t-0002").is_none());
    assert!(!filtered_target
        .writes()
        .iter()
        .any(|(c, id)| c == "tasks" && id == "t-0002"));

    let unfiltered_target = MemoryRemote::new();
    unfiltered_target.insert("tombstones", json!({ "id": 1, "entity_type": "task", "entity_id": "t-0002" }));
    let options = RestoreOptions {
        skip_filter: true,
        ..restore_options("u-1")
    };
    let report = restore_from_store(&ws.config, &unfiltered_target, &ws.conn, &options)
        .await
        .expect("unfiltered restore");
    assert_eq!(report.tallies["tasks"].skipped_tombstoned, 0);
    assert!(unfiltered_target.row("tasks", "t-0002").is_some());
}

#[tokio::test]
async fn dry_run_traces_decisions_without_writing() {
    let ws = workspace();
    let source = seeded_remote(5, 1);
    source.insert("tasks", json!({ "id": "t-gone", "is_deleted": true, "project_id": "p-1", "user_id": "u-1" }));
    source.insert("tasks", json!({ "id": "t-stray", "project_id": "p-1", "group_id": "g-missing", "user_id": "u-1" }));
    run_backup_cycle(&ws.config, &source, &ws.conn, 1_000, false)
        .await
        .expect("capture");

    let dry_target = MemoryRemote::new();
    let options = RestoreOptions {
        dry_run: true,
        ..restore_options("u-1")
    };
    let dry = restore_from_store(&ws.config, &dry_target, &ws.conn, &options)
        .await
        .expect("dry run");
    assert!(dry.dry_run);
    assert!(dry_target.writes().is_empty());

    let live_target = MemoryRemote::new();
    let live = restore_from_store(&ws.config, &live_target, &ws.conn, &restore_options("u-1"))
        .await
        .expect("live run");

    // A dry run predicts every live decision; only the write verb differs.
    let trace = |report: &shadow_mirror_lib::models::report::RestoreReport| {
        report
            .decisions
            .iter()
            .map(|d| {
                let action = match d.action {
                    RestoreAction::WouldUpsert => RestoreAction::Upserted,
                    other => other,
                };
                (d.collection.clone(), d.id.clone(), action)
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(trace(&dry), trace(&live));
    assert_eq!(dry.tallies, live.tallies);
    assert_eq!(dry.tallies["tasks"].skipped_deleted, 1);
    assert_eq!(dry.tallies["tasks"].restored, 6);
    assert_eq!(dry.tallies["tasks"].reference_nulled, 1);
}

#[tokio::test]
async fn corrupt_snapshot_is_refused() {
    let ws = workspace();
    let source = seeded_remote(3, 0);
    run_backup_cycle(&ws.config, &source, &ws.conn, 1_000, false)
        .await
        .expect("capture");
    let good = latest_good(&ws.conn).unwrap().unwrap();

    append_snapshot(
        &ws.conn,
        &NewSnapshot {
            timestamp: 2_000,
            kind: "full".to_string(),
            payload: good.payload.replace("task 1", "task one"),
            item_count: good.item_count,
            checksum: good.checksum.clone(),
            connection_healthy: true,
            latency_ms: 4,
        },
    )
    .expect("append tampered row");

    let target = MemoryRemote::new();
    let err = restore_from_store(&ws.config, &target, &ws.conn, &restore_options("u-1"))
        .await
        .expect_err("tampered snapshot");
    assert!(matches!(err, ShadowError::ChecksumMismatch { .. }));
    assert!(target.writes().is_empty());

    let older = RestoreOptions {
        snapshot_id: Some(good.id),
        ..restore_options("u-1")
    };
    restore_from_store(&ws.config, &target, &ws.conn, &older)
        .await
        .expect("restore verified snapshot by id");
    assert_eq!(target.rows("tasks").len(), 3);
}

#[tokio::test]
async fn export_file_restores_without_snapshot_store() {
    let ws = workspace();
    let source = seeded_remote(4, 2);
    run_backup_cycle(&ws.config, &source, &ws.conn, 1_000, false)
        .await
        .expect("capture");

    let target = MemoryRemote::new();
    let report = restore_from_export(&ws.config, &target, &ws.config.export_path(), &restore_options("u-1"))
        .await
        .expect("restore from export");

    assert_eq!(report.snapshot_id, None);
    assert_eq!(report.total_restored(), 4 + 2 + 1);
    let ids = |remote: &MemoryRemote| {
        state_of(remote)
            .into_iter()
            .map(|(name, rows)| {
                let ids: Vec<String> = rows.iter().map(|r| r["id"].to_string()).collect();
                (name, ids)
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&target), ids(&source));
    assert_eq!(target.row("tasks", "t-0003").unwrap()["title"], json!("task 3"));
}

#[tokio::test]
async fn restore_without_any_snapshot_reports_not_found() {
    let ws = workspace();
    let target = MemoryRemote::new();
    let err = restore_from_store(&ws.config, &target, &ws.conn, &RestoreOptions::default())
        .await
        .expect_err("nothing to restore");
    assert!(matches!(err, ShadowError::SnapshotNotFound(_)));
}
