// Client side of the remote profiler RPC
//
// One `ProfilerIpc` per remote call site. A request is three steps: prove
// the target attachment is alive (exclusive no-wait probe on its attachment
// lock), wake its listener (shared waiting lock on its listener resource,
// which delivers the blocking notification), then run the exchange under
// the channel's request mutex: write the frame, clear the client event,
// post the server event, and wait on the pre-clear snapshot. The wait has
// no timeout - a live peer always answers, and database shutdown finalizes
// the events out from under us.

use super::channel::ProfilerChannel;
use super::protocol::{Tag, WirePayload};
use crate::engine::{Attachment, AttachmentId, Database, Privilege};
use crate::error::{Error, Result};
use std::sync::Arc;

pub struct ProfilerIpc {
    database: Arc<Database>,
    attachment_id: AttachmentId,
    channel: Option<Arc<ProfilerChannel>>,
}

impl ProfilerIpc {
    /// Open (creating if needed) the channel for `target`.
    pub fn open(database: &Arc<Database>, target: AttachmentId) -> Result<Self> {
        let name = database.channel_name(target);
        let channel = database.channels().open(&name).map_err(|error| {
            tracing::error!("cannot initialize profiler channel {}: {}", name, error);
            error
        })?;

        Ok(Self {
            database: database.clone(),
            attachment_id: target,
            channel: Some(channel),
        })
    }

    /// Fire a command with no output payload.
    pub fn send<I: WirePayload>(
        &self,
        attachment: &Arc<Attachment>,
        tag: Tag,
        input: &I,
    ) -> Result<()> {
        self.exchange(attachment, tag, input)?;
        Ok(())
    }

    /// Fire a command and decode its response payload.
    pub fn send_and_receive<I: WirePayload, O: WirePayload>(
        &self,
        attachment: &Arc<Attachment>,
        tag: Tag,
        input: &I,
    ) -> Result<O> {
        let bytes = self.exchange(attachment, tag, input)?;
        O::decode_from_slice(&bytes)
    }

    fn exchange<I: WirePayload>(
        &self,
        attachment: &Arc<Attachment>,
        tag: Tag,
        input: &I,
    ) -> Result<Vec<u8>> {
        let locks = self.database.lock_manager();

        // Check if the target attachment is alive: getting the exclusive
        // lock means nobody holds it.
        if locks.try_lock_attachment_exclusive(self.attachment_id) {
            return Err(Error::AttachmentNotActive(self.attachment_id));
        }

        // Ask the remote attachment to initialize the profiler listener.
        locks.lock_listener_shared(self.attachment_id);

        let Some(channel) = self.channel.as_ref() else {
            return Err(Error::Protocol("channel already released".to_string()));
        };
        let payload = input.encode_to_vec()?;

        let _request = channel.lock_request();

        {
            let mut header = channel.header();
            header.tag = tag;

            if attachment.has_privilege(Privilege::ProfileAnyAttachment) {
                header.clear_user_name();
            } else {
                header.set_user_name(attachment.user_name());
            }

            header.write_payload(&payload)?;
        }

        let value = channel.client_event().clear();
        channel.server_event().post();

        if !channel.client_event().wait(value) {
            // Events finalized under us: the target is shutting down.
            return Err(Error::AttachmentShutdown);
        }

        let header = channel.header();
        match header.tag {
            Tag::Response => Ok(header.payload().to_vec()),
            Tag::Exception => Err(Error::Remote(header.exception_text())),
            other => Err(Error::Protocol(format!(
                "unexpected response tag {:?}",
                other
            ))),
        }
    }
}

impl Drop for ProfilerIpc {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            // If we were the only user (e.g. the probe failed against a dead
            // peer), this unregisters the channel we created.
            self.database.channels().release(channel);
        }
    }
}
