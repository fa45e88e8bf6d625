#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::json;
use shadow_mirror_lib::commands::db::open_snapshot_store;
use shadow_mirror_lib::remote::MemoryRemote;
use shadow_mirror_lib::ShadowConfig;
use tempfile::TempDir;

pub struct Workspace {
    pub dir: TempDir,
    pub config: ShadowConfig,
    pub conn: Connection,
}

pub fn workspace() -> Workspace {
    let dir = tempfile::tempdir().expect("create temp dir");
    let config = ShadowConfig {
        data_dir: dir.path().to_path_buf(),
        ..ShadowConfig::default()
    };
    let conn = open_snapshot_store(&config.db_path()).expect("open snapshot store");
    Workspace { dir, config, conn }
}

/// Remote with one project, `groups` groups and `tasks` tasks owned by `u-1`.
pub fn seeded_remote(tasks: usize, groups: usize) -> MemoryRemote {
    let remote = MemoryRemote::new();
    remote.insert("profiles", json!({ "id": "u-1" }));
    remote.insert("projects", json!({ "id": "p-1", "name": "Inbox", "user_id": "u-1" }));
    for i in 0..groups {
        remote.insert(
            "groups",
            json!({ "id": format!("g-{i:03}"), "project_id": "p-1", "parent_group_id": null, "user_id": "u-1" }),
        );
    }
    for i in 0..tasks {
        remote.insert(
            "tasks",
            json!({
                "id": format!("t-{i:04}"),
                "title": format!("task {i}"),
                "project_id": "p-1",
                "group_id": null,
                "parent_task_id": null,
                "user_id": "u-1"
            }),
        );
    }
    remote
}

/// Every tracked row per collection, in id order.
pub fn state_of(remote: &MemoryRemote) -> Vec<(String, Vec<serde_json::Value>)> {
    ["projects", "groups", "tasks"]
        .iter()
        .map(|name| (name.to_string(), remote.rows(name)))
        .collect()
}
