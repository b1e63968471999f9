// Server side of the remote profiler RPC
//
// A dedicated thread per target attachment, created lazily by the blocking
// notification the first remote caller triggers. The loop is a strict
// ping-pong against the client: snapshot the server event, service the
// frame if one is present, answer on the client event, and wait on the
// snapshot. The snapshot is taken before the frame is serviced, so a post
// landing while we work is seen immediately.
//
// Teardown is the part with teeth: set `exiting`, give the thread up to
// five seconds to have reached its loop (startup semaphore), take the
// request mutex so no client is mid-exchange, post the server event to
// break the wait, join, and only then finalize both events and hand the
// channel back to the registry.

use super::channel::ProfilerChannel;
use super::event::Semaphore;
use super::protocol::{
    CancelSessionInput, DiscardInput, FinishSessionInput, FlushInput, PauseSessionInput,
    ResumeSessionInput, SetFlushIntervalInput, StartSessionInput, Tag, WirePayload,
};
use crate::engine::{Attachment, Database};
use crate::error::{Error, Result};
use crate::profiler::package;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct ProfilerListener {
    database: Weak<Database>,
    channel: Option<Arc<ProfilerChannel>>,
    exiting: Arc<AtomicBool>,
    startup: Arc<Semaphore>,
    handle: Option<JoinHandle<()>>,
}

impl ProfilerListener {
    pub(crate) fn spawn(attachment: &Arc<Attachment>) -> Result<Self> {
        let database = attachment.database()?;
        let name = database.channel_name(attachment.id());
        let channel = database.channels().open(&name)?;

        let exiting = Arc::new(AtomicBool::new(false));
        let startup = Arc::new(Semaphore::new());

        let thread_attachment = Arc::downgrade(attachment);
        let thread_channel = channel.clone();
        let thread_exiting = exiting.clone();
        let thread_startup = startup.clone();

        let handle = thread::Builder::new()
            .name(format!("profiler-listener-{}", attachment.id()))
            .spawn(move || {
                listener_thread(
                    thread_attachment,
                    thread_channel,
                    thread_exiting,
                    thread_startup,
                )
            })
            .map_err(Error::Thread)?;

        tracing::debug!("profiler listener for attachment {} started", attachment.id());

        Ok(Self {
            database: Arc::downgrade(&database),
            channel: Some(channel),
            exiting,
            startup,
            handle: Some(handle),
        })
    }
}

impl Drop for ProfilerListener {
    fn drop(&mut self) {
        let Some(channel) = self.channel.take() else {
            return;
        };

        self.exiting.store(true, Ordering::SeqCst);

        // Make sure the thread has reached its loop before we try to break
        // it out.
        self.startup.try_enter(Duration::from_secs(5));

        {
            let _request = channel.lock_request();
            channel.server_event().post();
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("profiler listener thread panicked");
            }
        }

        channel.server_event().finalize();
        channel.client_event().finalize();

        // Hand our last reference back; with the thread joined, the registry
        // can drop the channel once no client is attached.
        if let Some(database) = self.database.upgrade() {
            database.channels().release(channel);
        }
    }
}

fn listener_thread(
    attachment: Weak<Attachment>,
    channel: Arc<ProfilerChannel>,
    exiting: Arc<AtomicBool>,
    startup: Arc<Semaphore>,
) {
    let mut first = true;

    while !exiting.load(Ordering::SeqCst) {
        let value = channel.server_event().clear();

        let tag = channel.header().tag;
        if tag != Tag::Nop {
            process_command(&attachment, &channel);
            channel.client_event().post();
        }

        if first {
            first = false;
            startup.release();
        }

        if exiting.load(Ordering::SeqCst) {
            break;
        }

        if !channel.server_event().wait(value) {
            break;
        }
    }

    if first {
        startup.release();
    }
}

/// Service one frame: dispatch, then overwrite the frame with either the
/// response payload or the serialized error text.
fn process_command(attachment: &Weak<Attachment>, channel: &Arc<ProfilerChannel>) {
    let (tag, user_name, payload) = {
        let header = channel.header();
        (
            header.tag,
            header.user_name().to_string(),
            header.payload().to_vec(),
        )
    };

    let result = dispatch(attachment, tag, &user_name, &payload);

    let mut header = channel.header();
    match result {
        Ok(bytes) => {
            header.tag = Tag::Response;
            if let Err(error) = header.write_payload(&bytes) {
                header.write_exception(&error.to_string());
            }
        }
        Err(error) => {
            tracing::debug!("profiler remote command failed: {}", error);
            header.write_exception(&error.to_string());
        }
    }
}

fn dispatch(
    attachment: &Weak<Attachment>,
    tag: Tag,
    user_name: &str,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let attachment = attachment.upgrade().ok_or(Error::AttachmentShutdown)?;

    // Non-empty user name means no bypass privilege: it must match the
    // target attachment's user.
    if !user_name.is_empty() && user_name != attachment.user_name() {
        return Err(Error::InsufficientPrivilege);
    }

    match tag {
        Tag::CancelSession => {
            CancelSessionInput::decode_from_slice(payload)?;
            attachment.enter().profiler()?.cancel_session();
            Ok(Vec::new())
        }

        Tag::Discard => {
            DiscardInput::decode_from_slice(payload)?;
            attachment.enter().profiler()?.discard();
            Ok(Vec::new())
        }

        Tag::FinishSession => {
            let input = FinishSessionInput::decode_from_slice(payload)?;
            attachment
                .enter()
                .profiler()?
                .finish_session(input.flush.unwrap_or(true));
            Ok(Vec::new())
        }

        Tag::Flush => {
            FlushInput::decode_from_slice(payload)?;
            attachment.enter().profiler()?.flush(true);
            Ok(Vec::new())
        }

        Tag::PauseSession => {
            let input = PauseSessionInput::decode_from_slice(payload)?;
            attachment
                .enter()
                .profiler()?
                .pause_session(input.flush.unwrap_or(false));
            Ok(Vec::new())
        }

        Tag::ResumeSession => {
            ResumeSessionInput::decode_from_slice(payload)?;
            attachment.enter().profiler()?.resume_session();
            Ok(Vec::new())
        }

        Tag::SetFlushInterval => {
            let input = SetFlushIntervalInput::decode_from_slice(payload)?;
            let Some(interval) = input.flush_interval else {
                return Err(Error::Protocol(
                    "SET_FLUSH_INTERVAL requires an interval".to_string(),
                ));
            };
            attachment.enter().profiler()?.set_flush_interval(interval)?;
            Ok(Vec::new())
        }

        Tag::StartSession => {
            let input = StartSessionInput::decode_from_slice(payload)?;
            let output = package::start_session_local(&attachment, &input)?;
            output.encode_to_vec()
        }

        other => Err(Error::Protocol(format!(
            "invalid profiler remote command {:?}",
            other
        ))),
    }
}
