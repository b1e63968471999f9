// Cross-attachment RPC tests - remote commands, privileges, liveness,
// listener teardown

use super::client::ProfilerIpc;
use super::protocol::{
    CancelSessionInput, FinishSessionInput, FlushInput, SetFlushIntervalInput, StartSessionInput,
    Tag,
};
use crate::config::ProfilerConfig;
use crate::engine::{Database, Privilege};
use crate::error::Error;
use crate::profiler::package;
use crate::profiler::test_support::{Call, RecordingPlugin};
use std::path::PathBuf;
use std::sync::Arc;

fn temp_data_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("dbspy-ipc-test-{}-{}", tag, std::process::id()))
}

fn test_db(tag: &str) -> Arc<Database> {
    crate::profiler::test_support::init_tracing();
    let config = ProfilerConfig {
        data_dir: temp_data_dir(tag),
        ..ProfilerConfig::default()
    };
    Database::open_with_config(format!("/data/ipc-{}.db", tag), config)
}

fn start_local(attachment: &Arc<crate::engine::Attachment>, plugin: &str) -> i64 {
    package::start_session(
        attachment,
        &StartSessionInput {
            plugin_name: Some(plugin.to_string()),
            ..Default::default()
        },
    )
    .unwrap()
    .session_id
    .unwrap()
}

/// Scenario: remote cancel. A (with the bypass privilege) cancels the
/// session B holds; B's plugin sees the cancel and the procedure returns
/// without output.
#[test]
fn test_remote_cancel() {
    let db = test_db("cancel");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");

    let a = db.attach("alice");
    a.grant(Privilege::ProfileAnyAttachment);
    let b = db.attach("bob");

    let id = start_local(&b, "rec");

    package::cancel_session(
        &a,
        &CancelSessionInput {
            attachment_id: Some(b.id() as i64),
        },
    )
    .unwrap();

    assert!(plugin
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Cancel { session_id } if *session_id == id)));
    assert_eq!(package::current_session_id(&b), None);

    b.detach();
    a.detach();
}

/// Scenario: privilege rejection. A different user without the bypass gets
/// an error naming the missing privilege, and the target session survives.
#[test]
fn test_remote_privilege_rejection() {
    let db = test_db("privilege");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");

    let a = db.attach("alice");
    let b = db.attach("bob");
    let id = start_local(&b, "rec");

    let err = package::cancel_session(
        &a,
        &CancelSessionInput {
            attachment_id: Some(b.id() as i64),
        },
    )
    .unwrap_err();

    match err {
        Error::Remote(message) => assert!(message.contains("PROFILE_ANY_ATTACHMENT")),
        other => panic!("expected a remote error, got {:?}", other),
    }

    // The command never executed.
    assert_eq!(plugin.count(|c| matches!(c, Call::Cancel { .. })), 0);
    assert_eq!(package::current_session_id(&b), Some(id));

    b.detach();
    a.detach();
}

/// Matching user names need no bypass privilege.
#[test]
fn test_remote_same_user_is_allowed() {
    let db = test_db("same-user");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");

    let a = db.attach("alice");
    let b = db.attach("alice");
    start_local(&b, "rec");

    package::cancel_session(
        &a,
        &CancelSessionInput {
            attachment_id: Some(b.id() as i64),
        },
    )
    .unwrap();
    assert_eq!(package::current_session_id(&b), None);

    b.detach();
    a.detach();
}

/// Scenario: dead peer. The liveness probe fails before any channel
/// traffic, and the channel created for the probe does not stay behind.
#[test]
fn test_remote_dead_peer() {
    let db = test_db("dead-peer");
    let a = db.attach("alice");
    a.grant(Privilege::ProfileAnyAttachment);

    let err = package::flush(
        &a,
        &FlushInput {
            attachment_id: Some(9999),
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::AttachmentNotActive(9999)));

    assert!(!db.channels().contains(&db.channel_name(9999)));

    a.detach();
}

/// Scenario: remote start/finish round trip. The response payload crosses
/// the channel byte-for-byte: the caller sees exactly the session id the
/// target allocated.
#[test]
fn test_remote_start_session_round_trip() {
    let db = test_db("start");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");

    let a = db.attach("alice");
    a.grant(Privilege::ProfileAnyAttachment);
    let b = db.attach("bob");

    let output = package::start_session(
        &a,
        &StartSessionInput {
            description: Some("remote profile".to_string()),
            plugin_name: Some("rec".to_string()),
            attachment_id: Some(b.id() as i64),
            ..Default::default()
        },
    )
    .unwrap();

    let session_id = output.session_id.unwrap();
    assert_eq!(package::current_session_id(&b), Some(session_id));
    assert!(plugin.calls().iter().any(|c| matches!(
        c,
        Call::StartSession { session_id: id, description, .. }
            if *id == session_id && description == "remote profile"
    )));

    package::finish_session(
        &a,
        &FinishSessionInput {
            flush: Some(false),
            attachment_id: Some(b.id() as i64),
        },
    )
    .unwrap();
    assert_eq!(package::current_session_id(&b), None);

    b.detach();
    a.detach();
}

/// Errors raised by the target are text-serialized and re-raised by the
/// client.
#[test]
fn test_remote_error_is_relayed_as_text() {
    let db = test_db("remote-error");
    let a = db.attach("alice");
    a.grant(Privilege::ProfileAnyAttachment);
    let b = db.attach("bob");

    let err = package::set_flush_interval(
        &a,
        &SetFlushIntervalInput {
            flush_interval: Some(-3),
            attachment_id: Some(b.id() as i64),
        },
    )
    .unwrap_err();

    match err {
        Error::Remote(message) => assert!(message.contains("invalid flush interval")),
        other => panic!("expected a remote error, got {:?}", other),
    }

    b.detach();
    a.detach();
}

/// A frame with a non-command tag draws a protocol error, serialized back
/// like any other listener-side failure.
#[test]
fn test_unknown_tag_is_rejected() {
    let db = test_db("bad-tag");
    let a = db.attach("alice");
    a.grant(Privilege::ProfileAnyAttachment);
    let b = db.attach("bob");

    let ipc = ProfilerIpc::open(&db, b.id()).unwrap();
    let err = ipc
        .send(&a, Tag::Response, &FlushInput { attachment_id: None })
        .unwrap_err();

    match err {
        Error::Remote(message) => assert!(message.contains("invalid profiler remote command")),
        other => panic!("expected a remote error, got {:?}", other),
    }

    drop(ipc);
    b.detach();
    a.detach();
}

/// Commands on one channel serialize; concurrent clients all complete.
#[test]
fn test_concurrent_remote_commands() {
    let db = test_db("concurrent");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");

    let b = db.attach("bob");
    start_local(&b, "rec");

    let mut handles = Vec::new();
    for i in 0..4 {
        let db = db.clone();
        let target = b.id();
        handles.push(std::thread::spawn(move || {
            let a = db.attach(&format!("user-{}", i));
            a.grant(Privilege::ProfileAnyAttachment);
            for _ in 0..5 {
                package::flush(
                    &a,
                    &FlushInput {
                        attachment_id: Some(target as i64),
                    },
                )
                .unwrap();
            }
            a.detach();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(plugin.count(|c| matches!(c, Call::Flush)) >= 20);

    b.detach();
}

/// Teardown: detaching the target stops the listener thread, finalizes the
/// events and unregisters the channel; later commands see a dead peer.
#[test]
fn test_listener_teardown() {
    let db = test_db("teardown");
    let plugin = RecordingPlugin::new();
    plugin.install(&db, "rec");

    let a = db.attach("alice");
    a.grant(Privilege::ProfileAnyAttachment);
    let b = db.attach("bob");
    let b_id = b.id();
    let channel_name = db.channel_name(b_id);

    // Drive one command through so the listener and channel exist.
    package::flush(
        &a,
        &FlushInput {
            attachment_id: Some(b_id as i64),
        },
    )
    .unwrap();
    assert!(db.channels().contains(&channel_name));

    b.detach();

    // The listener released the channel on the way out.
    assert!(!db.channels().contains(&channel_name));

    let err = package::flush(
        &a,
        &FlushInput {
            attachment_id: Some(b_id as i64),
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::AttachmentNotActive(id) if id == b_id));

    a.detach();
}
