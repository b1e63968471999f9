// Public command surface - the seven profiler control operations
//
// Each operation takes the calling attachment and the typed input payload
// the SQL layer would marshal, and routes local vs remote: a missing target
// attachment id, or one equal to the caller's own, executes directly
// against the caller's profiler manager; anything else goes over the shared
// channel to the target's listener.

use crate::engine::{Attachment, AttachmentId};
use crate::error::{Error, Result};
use crate::ipc::client::ProfilerIpc;
use crate::ipc::protocol::{
    CancelSessionInput, DiscardInput, FinishSessionInput, FlushInput, PauseSessionInput,
    ResumeSessionInput, SetFlushIntervalInput, StartSessionInput, StartSessionOutput, Tag,
    WirePayload,
};
use std::sync::Arc;

fn remote_target(attachment: &Arc<Attachment>, target: Option<i64>) -> Option<AttachmentId> {
    match target {
        Some(id) if id as u64 != attachment.id() => Some(id as u64),
        _ => None,
    }
}

fn send_remote<I: WirePayload>(
    attachment: &Arc<Attachment>,
    target: AttachmentId,
    tag: Tag,
    input: &I,
) -> Result<()> {
    let database = attachment.database()?;
    let ipc = ProfilerIpc::open(&database, target)?;
    ipc.send(attachment, tag, input)
}

pub fn cancel_session(attachment: &Arc<Attachment>, input: &CancelSessionInput) -> Result<()> {
    if let Some(target) = remote_target(attachment, input.attachment_id) {
        return send_remote(attachment, target, Tag::CancelSession, input);
    }

    attachment.enter().profiler()?.cancel_session();
    Ok(())
}

pub fn discard(attachment: &Arc<Attachment>, input: &DiscardInput) -> Result<()> {
    if let Some(target) = remote_target(attachment, input.attachment_id) {
        return send_remote(attachment, target, Tag::Discard, input);
    }

    attachment.enter().profiler()?.discard();
    Ok(())
}

pub fn finish_session(attachment: &Arc<Attachment>, input: &FinishSessionInput) -> Result<()> {
    if let Some(target) = remote_target(attachment, input.attachment_id) {
        return send_remote(attachment, target, Tag::FinishSession, input);
    }

    attachment
        .enter()
        .profiler()?
        .finish_session(input.flush.unwrap_or(true));
    Ok(())
}

pub fn flush(attachment: &Arc<Attachment>, input: &FlushInput) -> Result<()> {
    if let Some(target) = remote_target(attachment, input.attachment_id) {
        return send_remote(attachment, target, Tag::Flush, input);
    }

    attachment.enter().profiler()?.flush(true);
    Ok(())
}

pub fn pause_session(attachment: &Arc<Attachment>, input: &PauseSessionInput) -> Result<()> {
    if let Some(target) = remote_target(attachment, input.attachment_id) {
        return send_remote(attachment, target, Tag::PauseSession, input);
    }

    attachment
        .enter()
        .profiler()?
        .pause_session(input.flush.unwrap_or(false));
    Ok(())
}

pub fn resume_session(attachment: &Arc<Attachment>, input: &ResumeSessionInput) -> Result<()> {
    if let Some(target) = remote_target(attachment, input.attachment_id) {
        return send_remote(attachment, target, Tag::ResumeSession, input);
    }

    attachment.enter().profiler()?.resume_session();
    Ok(())
}

pub fn set_flush_interval(
    attachment: &Arc<Attachment>,
    input: &SetFlushIntervalInput,
) -> Result<()> {
    if let Some(target) = remote_target(attachment, input.attachment_id) {
        return send_remote(attachment, target, Tag::SetFlushInterval, input);
    }

    let Some(interval) = input.flush_interval else {
        return Err(Error::Protocol(
            "SET_FLUSH_INTERVAL requires an interval".to_string(),
        ));
    };
    attachment.enter().profiler()?.set_flush_interval(interval)
}

/// The one operation returning output: the new session id.
pub fn start_session(
    attachment: &Arc<Attachment>,
    input: &StartSessionInput,
) -> Result<StartSessionOutput> {
    if let Some(target) = remote_target(attachment, input.attachment_id) {
        let database = attachment.database()?;
        let ipc = ProfilerIpc::open(&database, target)?;
        return ipc.send_and_receive(attachment, Tag::StartSession, input);
    }

    start_session_local(attachment, input)
}

/// Local body of `start_session`, shared with the listener's dispatch so
/// remote requests resolve the default plugin against the target's own
/// configuration.
pub(crate) fn start_session_local(
    attachment: &Arc<Attachment>,
    input: &StartSessionInput,
) -> Result<StartSessionOutput> {
    let database = attachment.database()?;

    let plugin_name = match input.plugin_name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => database.config().default_plugin.clone(),
    };

    let session_id = attachment.enter().profiler()?.start_session(
        input.flush_interval,
        &plugin_name,
        input.description.as_deref().unwrap_or(""),
        input.plugin_options.as_deref().unwrap_or(""),
    )?;

    Ok(StartSessionOutput {
        session_id: Some(session_id),
    })
}

/// Convenience accessor used by tests and embedding code: the current
/// session id of an attachment, if any.
pub fn current_session_id(attachment: &Arc<Attachment>) -> Option<i64> {
    let mut ctx = attachment.enter();
    ctx.profiler_opt().and_then(|profiler| profiler.session_id())
}
