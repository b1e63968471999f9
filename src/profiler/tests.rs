// Profiler manager tests - local operations, hooks, sequencing, timer

use super::package;
use super::plugin::ProfilerPlugin;
use super::test_support::{Call, FailingPlugin, RecordingPlugin};
use crate::config::ProfilerConfig;
use crate::engine::{Attachment, Database};
use crate::error::Error;
use crate::exec::{Statement, StatementBuilder, StatementKind, Table, Value};
use crate::ipc::protocol::{
    FinishSessionInput, FlushInput, PauseSessionInput, ResumeSessionInput, SetFlushIntervalInput,
    StartSessionInput,
};
use crate::recsrc::{LockedStream, TableScan, Union};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn temp_data_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("dbspy-test-{}-{}", tag, std::process::id()))
}

fn test_db(tag: &str) -> Arc<Database> {
    super::test_support::init_tracing();
    let config = ProfilerConfig {
        data_dir: temp_data_dir(tag),
        ..ProfilerConfig::default()
    };
    Database::open_with_config(format!("/data/{}.db", tag), config)
}

fn int_table(name: &str, count: i64) -> Arc<Table> {
    let rows = (0..count).map(|i| vec![Value::Int(i)]).collect();
    Arc::new(Table::new(name, 1, rows))
}

/// `select * from T1` - a single-cursor, single-scan statement.
fn scan_statement(id: u64) -> Arc<Statement> {
    StatementBuilder::new(id, StatementKind::Block)
        .sql_text("select * from T1")
        .cursor(None, 1, 1, |scratch| {
            Box::new(TableScan::new(scratch, int_table("T1", 2), None))
        })
        .build()
}

/// The S6 shape: Union(arg1 = LockedStream(Scan T1), arg2 = Scan T2).
fn union_statement(id: u64) -> Arc<Statement> {
    StatementBuilder::new(id, StatementKind::Block)
        .sql_text("select * from T1 for update union all select * from T2")
        .cursor(None, 1, 1, |scratch| {
            let t1 = TableScan::new(scratch, int_table("T1", 2), None);
            let t1_stream = t1.stream();
            let locked = LockedStream::new(scratch, Box::new(t1), false);
            let t2 = TableScan::new(scratch, int_table("T2", 2), None);
            let t2_stream = t2.stream();
            Box::new(Union::new(
                scratch,
                vec![Box::new(locked), Box::new(t2)],
                vec![t1_stream, t2_stream],
            ))
        })
        .build()
}

/// Open the statement's first cursor, drain it, close, finish the request.
fn run_query(attachment: &Arc<Attachment>, statement: &Arc<Statement>) -> u64 {
    let mut req = attachment.start_request(statement);
    let cursor = statement.cursors()[0].clone();

    let mut ctx = attachment.enter();
    cursor.open(&mut ctx, &mut req).unwrap();
    while cursor.fetch_next(&mut ctx, &mut req).unwrap() {}
    cursor.close(&mut ctx, &mut req);
    ctx.finish_request(&req);

    req.stats.records_fetched
}

fn start(attachment: &Arc<Attachment>, plugin: &str, flush_interval: Option<i32>) -> i64 {
    package::start_session(
        attachment,
        &StartSessionInput {
            plugin_name: Some(plugin.to_string()),
            flush_interval,
            ..Default::default()
        },
    )
    .unwrap()
    .session_id
    .unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: local start / observe / finish
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_local_start_observe_finish() {
    let db = test_db("s1");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");
    let att = db.attach("alice");

    start(&att, "rec", Some(0));

    let fetched = run_query(&att, &scan_statement(10));
    assert_eq!(fetched, 2);

    package::finish_session(
        &att,
        &FinishSessionInput {
            flush: Some(true),
            attachment_id: None,
        },
    )
    .unwrap();

    let calls = plugin.calls();
    assert_eq!(
        plugin.count(|c| matches!(c, Call::DefineStatement { .. })),
        1
    );
    assert_eq!(plugin.count(|c| matches!(c, Call::DefineCursor { .. })), 1);
    assert_eq!(
        plugin.count(|c| matches!(c, Call::DefineRecordSource { .. })),
        1
    );

    // The leaf scan is the cursor root: sequence 1, level 0, no parent.
    assert!(calls.iter().any(|c| matches!(
        c,
        Call::DefineRecordSource {
            sequence: 1,
            level: 0,
            parent_sequence: 0,
            ..
        }
    )));

    // One open + three fetches (two rows and the miss).
    assert_eq!(
        plugin.count(|c| matches!(c, Call::RecordSourceEvent { event: "OPEN", .. })),
        1
    );
    assert_eq!(
        plugin.count(|c| matches!(c, Call::RecordSourceEvent { event: "GET_RECORD", .. })),
        3
    );

    assert_eq!(
        plugin.count(|c| matches!(c, Call::RequestFinish { records_fetched: 2, .. })),
        1
    );
    assert_eq!(plugin.count(|c| matches!(c, Call::Finish { .. })), 1);
    assert!(plugin.count(|c| matches!(c, Call::Flush)) >= 1);

    att.detach();
}

// ─────────────────────────────────────────────────────────────────────────────
// Invariants
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_at_most_one_session() {
    let db = test_db("one-session");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");
    let att = db.attach("alice");

    let first = start(&att, "rec", None);
    let second = start(&att, "rec", None);
    assert_ne!(first, second);

    // Starting the second session finished the first at the current
    // timestamp.
    assert!(plugin
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Finish { session_id } if *session_id == first)));
    assert_eq!(package::current_session_id(&att), Some(second));

    att.detach();
}

#[test]
fn test_pre_order_sequencing() {
    let db = test_db("s6");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");
    let att = db.attach("alice");

    start(&att, "rec", None);
    run_query(&att, &union_statement(20));

    let defines: Vec<(u32, u32, u32, String)> = plugin
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::DefineRecordSource {
                sequence,
                level,
                parent_sequence,
                description,
                ..
            } => Some((sequence, level, parent_sequence, description)),
            _ => None,
        })
        .collect();

    // Union -> 1 (level 0), LockedStream -> 2 (level 1), Scan T1 -> 3
    // (level 2), Scan T2 -> 4 (level 1); parent sequences mirror the tree.
    assert_eq!(defines.len(), 4);
    assert_eq!(defines[0].0, 1);
    assert_eq!(defines[0].1, 0);
    assert_eq!(defines[0].2, 0);
    assert!(defines[0].3.contains("Union"));

    assert_eq!(defines[1].0, 2);
    assert_eq!(defines[1].1, 1);
    assert_eq!(defines[1].2, 1);
    assert!(defines[1].3.contains("Write Lock"));

    assert_eq!(defines[2].0, 3);
    assert_eq!(defines[2].1, 2);
    assert_eq!(defines[2].2, 2);
    assert!(defines[2].3.contains("T1"));

    assert_eq!(defines[3].0, 4);
    assert_eq!(defines[3].1, 1);
    assert_eq!(defines[3].2, 1);
    assert!(defines[3].3.contains("T2"));

    att.detach();
}

#[test]
fn test_statement_parents_defined_first() {
    let db = test_db("parents");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");
    let att = db.attach("alice");

    let parent = StatementBuilder::new(30, StatementKind::Procedure)
        .routine_name("REPORT")
        .build();
    let child = StatementBuilder::new(31, StatementKind::Trigger)
        .routine_name("REPORT_AUDIT")
        .parent(parent)
        .cursor(None, 4, 9, |scratch| {
            Box::new(TableScan::new(scratch, int_table("AUDIT", 1), None))
        })
        .build();

    start(&att, "rec", None);
    run_query(&att, &child);

    let statements: Vec<(i64, i64, String)> = plugin
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::DefineStatement {
                statement_id,
                parent_statement_id,
                kind,
                ..
            } => Some((statement_id, parent_statement_id, kind)),
            _ => None,
        })
        .collect();

    assert_eq!(statements.len(), 2);
    // Parent first, with no parent of its own; then the child referencing it.
    assert_eq!(statements[0], (30, 0, "PROCEDURE".to_string()));
    assert_eq!(statements[1], (31, 30, "TRIGGER".to_string()));

    att.detach();
}

#[test]
fn test_definitions_happen_once_per_session() {
    let db = test_db("define-once");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");
    let att = db.attach("alice");

    let statement = scan_statement(40);
    start(&att, "rec", None);
    run_query(&att, &statement);
    run_query(&att, &statement);

    assert_eq!(
        plugin.count(|c| matches!(c, Call::DefineStatement { .. })),
        1
    );
    assert_eq!(plugin.count(|c| matches!(c, Call::DefineCursor { .. })), 1);
    assert_eq!(
        plugin.count(|c| matches!(c, Call::DefineRecordSource { .. })),
        1
    );
    // Both requests completed.
    assert_eq!(plugin.count(|c| matches!(c, Call::RequestFinish { .. })), 2);

    att.detach();
}

#[test]
fn test_pause_suppresses_observation() {
    let db = test_db("pause");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");
    let att = db.attach("alice");

    start(&att, "rec", None);
    package::pause_session(
        &att,
        &PauseSessionInput {
            flush: Some(false),
            attachment_id: None,
        },
    )
    .unwrap();

    run_query(&att, &scan_statement(50));
    assert_eq!(
        plugin.count(|c| matches!(c, Call::DefineRecordSource { .. })),
        0
    );
    assert_eq!(
        plugin.count(|c| matches!(c, Call::RecordSourceEvent { .. })),
        0
    );

    package::resume_session(
        &att,
        &ResumeSessionInput {
            attachment_id: None,
        },
    )
    .unwrap();

    run_query(&att, &scan_statement(50));
    assert_eq!(
        plugin.count(|c| matches!(c, Call::DefineRecordSource { .. })),
        1
    );
    assert!(plugin.count(|c| matches!(c, Call::RecordSourceEvent { .. })) > 0);

    att.detach();
}

#[test]
fn test_cancel_session_notifies_plugin_without_flush() {
    let db = test_db("cancel");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");
    let att = db.attach("alice");

    let id = start(&att, "rec", None);
    att.enter().profiler().unwrap().cancel_session();

    assert!(plugin
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Cancel { session_id } if *session_id == id)));
    assert_eq!(plugin.count(|c| matches!(c, Call::Flush)), 0);
    assert_eq!(package::current_session_id(&att), None);

    att.detach();
}

#[test]
fn test_discard_drops_session_silently() {
    let db = test_db("discard");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");
    let att = db.attach("alice");

    start(&att, "rec", None);
    att.enter().profiler().unwrap().discard();

    assert_eq!(plugin.count(|c| matches!(c, Call::Finish { .. })), 0);
    assert_eq!(plugin.count(|c| matches!(c, Call::Cancel { .. })), 0);
    assert_eq!(package::current_session_id(&att), None);

    att.detach();
}

#[test]
fn test_flush_garbage_collects_unreferenced_plugins() {
    let db = test_db("gc");
    let plugin_a = RecordingPlugin::new();
    plugin_a.install(&db, "a");
    let plugin_b = RecordingPlugin::new();
    plugin_b.install(&db, "b");
    let att = db.attach("alice");

    start(&att, "a", None);
    package::finish_session(
        &att,
        &FinishSessionInput {
            flush: Some(false),
            attachment_id: None,
        },
    )
    .unwrap();
    start(&att, "b", None);

    // First flush reaches both plugins, then drops "a" (no session uses it).
    package::flush(&att, &FlushInput { attachment_id: None }).unwrap();
    assert_eq!(plugin_a.count(|c| matches!(c, Call::Flush)), 1);
    assert_eq!(plugin_b.count(|c| matches!(c, Call::Flush)), 1);

    // Second flush only sees "b".
    package::flush(&att, &FlushInput { attachment_id: None }).unwrap();
    assert_eq!(plugin_a.count(|c| matches!(c, Call::Flush)), 1);
    assert_eq!(plugin_b.count(|c| matches!(c, Call::Flush)), 2);

    att.detach();
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation and error paths
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_flush_interval() {
    let db = test_db("bad-interval");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");
    let att = db.attach("alice");

    let err = package::start_session(
        &att,
        &StartSessionInput {
            plugin_name: Some("rec".to_string()),
            flush_interval: Some(-1),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidFlushInterval(-1)));

    // A failed validation must not have started a session.
    assert_eq!(package::current_session_id(&att), None);

    start(&att, "rec", None);
    let err = package::set_flush_interval(
        &att,
        &SetFlushIntervalInput {
            flush_interval: Some(-7),
            attachment_id: None,
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidFlushInterval(-7)));

    att.detach();
}

#[test]
fn test_unknown_plugin_name() {
    let db = test_db("no-plugin");
    let att = db.attach("alice");

    let err = package::start_session(
        &att,
        &StartSessionInput {
            plugin_name: Some("nope".to_string()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::PluginNotFound(name) if name == "nope"));

    att.detach();
}

#[test]
fn test_start_session_plugin_error_propagates() {
    let db = test_db("failing");
    db.plugins().register("boom", || {
        Arc::new(FailingPlugin) as Arc<dyn ProfilerPlugin>
    });
    let att = db.attach("alice");

    let err = package::start_session(
        &att,
        &StartSessionInput {
            plugin_name: Some("boom".to_string()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("backend refused to start"));
    assert_eq!(package::current_session_id(&att), None);

    att.detach();
}

// ─────────────────────────────────────────────────────────────────────────────
// Timer
// ─────────────────────────────────────────────────────────────────────────────

/// Scenario: a one-second flush interval and no user action must still
/// produce periodic plugin flushes.
#[test]
fn test_timer_flush() {
    let db = test_db("timer");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");
    let att = db.attach("alice");

    start(&att, "rec", Some(1));
    std::thread::sleep(Duration::from_millis(2500));

    assert!(
        plugin.count(|c| matches!(c, Call::Flush)) >= 2,
        "expected at least two timed flushes, saw {:?}",
        plugin.calls()
    );

    att.detach();
}

#[test]
fn test_pause_stops_timed_flushes() {
    let db = test_db("timer-pause");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");
    let att = db.attach("alice");

    start(&att, "rec", Some(1));
    package::pause_session(
        &att,
        &PauseSessionInput {
            flush: Some(false),
            attachment_id: None,
        },
    )
    .unwrap();

    // The armed shot may still fire once; after that the timer must not
    // re-arm while paused.
    std::thread::sleep(Duration::from_millis(2500));
    assert!(plugin.count(|c| matches!(c, Call::Flush)) <= 1);

    att.detach();
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in JSON Lines backend
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_default_backend_writes_jsonl() {
    let db = test_db("jsonl");
    let att = db.attach("alice");

    let data_dir = db.config().data_dir.clone();
    let _ = std::fs::remove_dir_all(&data_dir);

    let output = package::start_session(
        &att,
        &StartSessionInput {
            description: Some("smoke".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    let session_id = output.session_id.unwrap();

    run_query(&att, &scan_statement(60));
    package::finish_session(
        &att,
        &FinishSessionInput {
            flush: Some(true),
            attachment_id: None,
        },
    )
    .unwrap();

    let path = data_dir.join(format!("profile-session-{}.jsonl", session_id));
    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let types: Vec<&str> = lines
        .iter()
        .map(|line| line["type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"SessionStart"));
    assert!(types.contains(&"Statement"));
    assert!(types.contains(&"Cursor"));
    assert!(types.contains(&"RecordSource"));
    assert!(types.contains(&"RequestFinish"));
    assert!(types.contains(&"SessionFinish"));

    let _ = std::fs::remove_dir_all(&data_dir);
    att.detach();
}
