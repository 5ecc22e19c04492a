/// Public-surface checks: config resolution, heuristic-set sanity, and the
/// wire shapes exchanged with the task store.
use cameo_pilot::core::config::{Config, FileConfig};
use cameo_pilot::{LogEntry, LogLevel, PageHeuristics, Task, TaskPatch, TaskStatus};

#[test]
fn test_resolved_config_defaults() {
    let cfg = Config::resolve(FileConfig::default());

    println!("🧪 resolved defaults: table={}", cfg.store_table);
    assert_eq!(cfg.store_table, "character_tasks");
    assert_eq!(cfg.processing_timeout.as_secs(), 120);
    assert_eq!(cfg.login_poll_interval.as_secs(), 5);
    assert!(!cfg.headless, "visible browser is the default for manual login");
}

#[test]
fn test_v1_heuristics_shape() {
    let h = PageHeuristics::v1();

    println!("🧪 heuristics {}: {} accept screens", h.version, h.accept_screens.len());
    assert_eq!(h.version, "v1");
    assert_eq!(h.accept_screens.len(), 3);
    for target in [&h.overflow_menu, &h.create_item, &h.trim_confirm, &h.save] {
        assert!(
            !target.strategies.is_empty(),
            "target '{}' has no strategies",
            target.name
        );
    }
    assert!(!h.login.logged_out_markers.is_empty());
    assert!(!h.extraction.name_selectors.is_empty());
    assert!(!h.extraction.avatar_selectors.is_empty());
}

#[test]
fn test_task_row_wire_round_trip() {
    let row = serde_json::json!({
        "id": "3f6d",
        "source_video_url": "https://example.test/p/abc",
        "status": "pending",
        "logs": [
            {"id": 1000001, "timestamp": "2025-11-02T10:00:00Z", "level": "info", "message": "queued"},
            {"id": 1000002, "timestamp": "2025-11-02T10:00:01Z", "level": "warn", "message": "retrying"}
        ],
        "created_at": "2025-11-02T09:59:00Z",
        "extra_column_from_newer_schema": 42
    });

    let task: Task = serde_json::from_value(row).expect("row decodes");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.logs.len(), 2);
    assert_eq!(task.logs[0].level, LogLevel::Info);
    assert_eq!(task.logs[1].message, "retrying");

    // Log arrays survive a write/read cycle byte-identically in order.
    let encoded = serde_json::to_string(&task.logs).unwrap();
    let decoded: Vec<LogEntry> = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, task.logs);
}

#[test]
fn test_terminal_patch_shapes() {
    let completed = TaskPatch {
        status: Some(TaskStatus::Completed),
        remote_id: Some("luna_9x".into()),
        profile_url: Some("https://example.test/characters/luna_9x".into()),
        ..Default::default()
    };
    let json = serde_json::to_value(&completed).unwrap();
    let obj = json.as_object().unwrap();
    assert_eq!(obj.len(), 3, "unset fields must not appear in the PATCH body");
    assert_eq!(obj["status"], "completed");

    let failed = TaskPatch::status(TaskStatus::Failed).with_error("stage 'open_menu' failed");
    let json = serde_json::to_value(&failed).unwrap();
    assert!(json.get("error_message").is_some());
    assert!(json.get("remote_id").is_none());
}

#[test]
fn test_log_level_glyphs_are_distinct() {
    let glyphs = [
        LogLevel::Info.glyph(),
        LogLevel::Success.glyph(),
        LogLevel::Warn.glyph(),
        LogLevel::Error.glyph(),
    ];
    for (i, a) in glyphs.iter().enumerate() {
        for b in glyphs.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }
}
