// The profiler channel - in-process model of the named shared-memory region
//
// One channel per (database, target attachment), registered process-wide by
// name in the database's channel registry. The fixed header carries the
// request frame; the two counting events carry the ping-pong. The request
// mutex serializes whole client exchanges and is held by a client from
// frame write to response read; the header mutex only guards individual
// header accesses, so the listener can answer while the client holds the
// request mutex. Events are posted and waited on without either mutex.
//
// The region is initialized exactly once, by whoever creates it; later
// openers validate the version stamp.

use super::event::IpcEvent;
use super::protocol::Tag;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub const PROFILER_CHANNEL_VERSION: u16 = 1;
pub const USERNAME_LENGTH: usize = 63;
pub const PROFILER_BUFFER_SIZE: usize = 4096;

/// The fixed part of the channel region.
pub struct ChannelHeader {
    pub version: u16,
    pub buffer_size: u16,
    pub tag: Tag,
    user_name: [u8; USERNAME_LENGTH + 1],
    buffer: [u8; PROFILER_BUFFER_SIZE],
}

impl ChannelHeader {
    fn new() -> Self {
        Self {
            version: PROFILER_CHANNEL_VERSION,
            buffer_size: 0,
            tag: Tag::Nop,
            user_name: [0; USERNAME_LENGTH + 1],
            buffer: [0; PROFILER_BUFFER_SIZE],
        }
    }

    /// Store a bounded, NUL-terminated user name.
    pub fn set_user_name(&mut self, name: &str) {
        let bytes = truncate_to_boundary(name, USERNAME_LENGTH).as_bytes();
        self.user_name[..bytes.len()].copy_from_slice(bytes);
        self.user_name[bytes.len()] = 0;
    }

    /// Empty means the caller holds the bypass privilege.
    pub fn clear_user_name(&mut self) {
        self.user_name[0] = 0;
    }

    pub fn user_name(&self) -> &str {
        let len = self
            .user_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.user_name.len());
        std::str::from_utf8(&self.user_name[..len]).unwrap_or("")
    }

    pub fn write_payload(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > PROFILER_BUFFER_SIZE {
            return Err(Error::Protocol(format!(
                "payload of {} bytes exceeds the channel buffer",
                bytes.len()
            )));
        }
        self.buffer[..bytes.len()].copy_from_slice(bytes);
        self.buffer_size = bytes.len() as u16;
        Ok(())
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.buffer_size as usize]
    }

    /// Serialize an error as NUL-terminated text and mark the frame as an
    /// exception.
    pub fn write_exception(&mut self, message: &str) {
        let text = truncate_to_boundary(message, PROFILER_BUFFER_SIZE - 1);
        let bytes = text.as_bytes();
        self.buffer[..bytes.len()].copy_from_slice(bytes);
        self.buffer[bytes.len()] = 0;
        self.buffer_size = bytes.len() as u16;
        self.tag = Tag::Exception;
    }

    pub fn exception_text(&self) -> String {
        let payload = self.payload();
        let len = payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(payload.len());
        String::from_utf8_lossy(&payload[..len]).into_owned()
    }
}

/// Walk back to a UTF-8 character boundary at or before `max_bytes`.
fn truncate_to_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

pub struct ProfilerChannel {
    name: String,
    request_mutex: Mutex<()>,
    header: Mutex<ChannelHeader>,
    server_event: IpcEvent,
    client_event: IpcEvent,
}

impl ProfilerChannel {
    fn create(name: &str) -> Self {
        // First-writer initialization: version stamp and both events.
        Self {
            name: name.to_string(),
            request_mutex: Mutex::new(()),
            header: Mutex::new(ChannelHeader::new()),
            server_event: IpcEvent::new(),
            client_event: IpcEvent::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialize a whole client exchange. Held from frame write to response
    /// read.
    pub fn lock_request(&self) -> MutexGuard<'_, ()> {
        self.request_mutex.lock().unwrap()
    }

    pub fn header(&self) -> MutexGuard<'_, ChannelHeader> {
        self.header.lock().unwrap()
    }

    pub fn server_event(&self) -> &IpcEvent {
        &self.server_event
    }

    pub fn client_event(&self) -> &IpcEvent {
        &self.client_event
    }

    #[cfg(test)]
    pub fn corrupt_version_for_test(&self, version: u16) {
        self.header.lock().unwrap().version = version;
    }
}

/// Process-wide registry of named channels, owned by the database object.
pub struct ChannelRegistry {
    map: Mutex<HashMap<String, Arc<ProfilerChannel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Open the named channel, creating and initializing it on first use.
    pub fn open(&self, name: &str) -> Result<Arc<ProfilerChannel>> {
        let mut map = self.map.lock().unwrap();

        if let Some(existing) = map.get(name) {
            let version = existing.header().version;
            if version != PROFILER_CHANNEL_VERSION {
                return Err(Error::IpcInit(format!(
                    "channel {} has version {}, expected {}",
                    name, version, PROFILER_CHANNEL_VERSION
                )));
            }
            return Ok(existing.clone());
        }

        let channel = Arc::new(ProfilerChannel::create(name));
        map.insert(name.to_string(), channel.clone());
        tracing::debug!("profiler channel {} created", name);
        Ok(channel)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.lock().unwrap().contains_key(name)
    }

    /// Give a channel reference back; the channel is unregistered once the
    /// registry holds the last remaining reference.
    pub fn release(&self, channel: Arc<ProfilerChannel>) {
        let mut map = self.map.lock().unwrap();
        if Arc::strong_count(&channel) <= 2 {
            map.remove(channel.name());
            tracing::debug!("profiler channel {} removed", channel.name());
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_name_is_bounded_and_terminated() {
        let mut header = ChannelHeader::new();
        header.set_user_name(&"x".repeat(200));
        assert_eq!(header.user_name().len(), USERNAME_LENGTH);

        header.set_user_name("alice");
        assert_eq!(header.user_name(), "alice");

        header.clear_user_name();
        assert_eq!(header.user_name(), "");
    }

    #[test]
    fn test_payload_bounds() {
        let mut header = ChannelHeader::new();
        assert!(header.write_payload(&[1, 2, 3]).is_ok());
        assert_eq!(header.payload(), &[1, 2, 3]);

        let oversized = vec![0u8; PROFILER_BUFFER_SIZE + 1];
        assert!(matches!(
            header.write_payload(&oversized),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_exception_roundtrip() {
        let mut header = ChannelHeader::new();
        header.write_exception("something went wrong");
        assert_eq!(header.tag, Tag::Exception);
        assert_eq!(header.exception_text(), "something went wrong");
    }

    #[test]
    fn test_exception_truncates_on_char_boundary() {
        let mut header = ChannelHeader::new();
        let long = "é".repeat(PROFILER_BUFFER_SIZE);
        header.write_exception(&long);
        let text = header.exception_text();
        assert!(text.len() < PROFILER_BUFFER_SIZE);
        assert!(text.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_registry_open_is_idempotent_and_release_removes() {
        let registry = ChannelRegistry::new();
        let a = registry.open("chan").unwrap();
        let b = registry.open("chan").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        // Two users: the first release keeps the channel registered.
        registry.release(a);
        let c = registry.open("chan").unwrap();
        assert!(Arc::ptr_eq(&b, &c));

        registry.release(b);
        registry.release(c);
        // All users gone: a new open creates a fresh channel.
        let d = registry.open("chan").unwrap();
        assert_eq!(d.header().tag, Tag::Nop);
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let registry = ChannelRegistry::new();
        let channel = registry.open("chan").unwrap();
        channel.corrupt_version_for_test(99);
        assert!(matches!(registry.open("chan"), Err(Error::IpcInit(_))));
    }
}
