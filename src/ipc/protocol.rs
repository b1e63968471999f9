// Wire protocol for the profiler channel
//
// Commands and responses cross the shared channel as a tag byte plus a
// packed little-endian payload in the channel buffer. Field order is stable
// and payload sizes are implicitly versioned by the tag: decoders validate
// lengths and fail with a protocol error instead of trusting the peer.
// Nullable SQL arguments travel as value-then-flag pairs; strings as a
// 16-bit length followed by the bytes.

use crate::error::{Error, Result};

/// Command and response tags, in stable numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Nop = 0,

    Response,
    Exception,

    CancelSession,
    Discard,
    FinishSession,
    Flush,
    PauseSession,
    ResumeSession,
    SetFlushInterval,
    StartSession,
}

impl Tag {
    pub fn from_u8(value: u8) -> Option<Tag> {
        match value {
            0 => Some(Tag::Nop),
            1 => Some(Tag::Response),
            2 => Some(Tag::Exception),
            3 => Some(Tag::CancelSession),
            4 => Some(Tag::Discard),
            5 => Some(Tag::FinishSession),
            6 => Some(Tag::Flush),
            7 => Some(Tag::PauseSession),
            8 => Some(Tag::ResumeSession),
            9 => Some(Tag::SetFlushInterval),
            10 => Some(Tag::StartSession),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Packed readers and writers
// ─────────────────────────────────────────────────────────────────────────────

fn short_buffer() -> Error {
    Error::Protocol("short buffer".to_string())
}

/// Incremental little-endian writer over a growable buffer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Value-then-flag encoding of a nullable 64-bit integer.
    fn put_opt_i64(&mut self, value: Option<i64>) {
        self.put_i64(value.unwrap_or(0));
        self.put_bool(value.is_none());
    }

    fn put_opt_i32(&mut self, value: Option<i32>) {
        self.put_i32(value.unwrap_or(0));
        self.put_bool(value.is_none());
    }

    fn put_opt_bool(&mut self, value: Option<bool>) {
        self.put_bool(value.unwrap_or(false));
        self.put_bool(value.is_none());
    }

    /// Length-prefixed string followed by the null flag.
    fn put_opt_str(&mut self, value: Option<&str>) -> Result<()> {
        let bytes = value.unwrap_or("").as_bytes();
        let len = u16::try_from(bytes.len())
            .map_err(|_| Error::Protocol("string argument too long".to_string()))?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(bytes);
        self.put_bool(value.is_none());
        Ok(())
    }
}

/// Incremental little-endian reader over a received payload.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// All bytes consumed; trailing garbage is a protocol error.
    pub fn finish(self) -> Result<()> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(Error::Protocol("trailing bytes in payload".to_string()))
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(short_buffer)?;
        if end > self.buf.len() {
            return Err(short_buffer());
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_bool(&mut self) -> Result<bool> {
        Ok(self.take_u8()? != 0)
    }

    fn take_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn take_i64(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn take_opt_i64(&mut self) -> Result<Option<i64>> {
        let value = self.take_i64()?;
        let null = self.take_bool()?;
        Ok((!null).then_some(value))
    }

    fn take_opt_i32(&mut self) -> Result<Option<i32>> {
        let value = self.take_i32()?;
        let null = self.take_bool()?;
        Ok((!null).then_some(value))
    }

    fn take_opt_bool(&mut self) -> Result<Option<bool>> {
        let value = self.take_bool()?;
        let null = self.take_bool()?;
        Ok((!null).then_some(value))
    }

    fn take_opt_str(&mut self) -> Result<Option<String>> {
        let len = u16::from_le_bytes(self.take(2)?.try_into().unwrap()) as usize;
        let bytes = self.take(len)?;
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::Protocol("string argument is not UTF-8".to_string()))?
            .to_string();
        let null = self.take_bool()?;
        Ok((!null).then_some(text))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command payloads
// ─────────────────────────────────────────────────────────────────────────────

/// A payload that can cross the channel buffer.
pub trait WirePayload: Sized {
    fn encode(&self, writer: &mut WireWriter) -> Result<()>;
    fn decode(reader: &mut WireReader<'_>) -> Result<Self>;

    fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut writer = WireWriter::new();
        self.encode(&mut writer)?;
        Ok(writer.into_bytes())
    }

    fn decode_from_slice(bytes: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(bytes);
        let value = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// Empty response body for the void procedures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoidOutput;

impl WirePayload for VoidOutput {
    fn encode(&self, _writer: &mut WireWriter) -> Result<()> {
        Ok(())
    }

    fn decode(_reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(VoidOutput)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelSessionInput {
    pub attachment_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscardInput {
    pub attachment_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushInput {
    pub attachment_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeSessionInput {
    pub attachment_id: Option<i64>,
}

impl WirePayload for CancelSessionInput {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.put_opt_i64(self.attachment_id);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            attachment_id: reader.take_opt_i64()?,
        })
    }
}

impl WirePayload for DiscardInput {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.put_opt_i64(self.attachment_id);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            attachment_id: reader.take_opt_i64()?,
        })
    }
}

impl WirePayload for FlushInput {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.put_opt_i64(self.attachment_id);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            attachment_id: reader.take_opt_i64()?,
        })
    }
}

impl WirePayload for ResumeSessionInput {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.put_opt_i64(self.attachment_id);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            attachment_id: reader.take_opt_i64()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishSessionInput {
    pub flush: Option<bool>,
    pub attachment_id: Option<i64>,
}

impl WirePayload for FinishSessionInput {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.put_opt_bool(self.flush);
        writer.put_opt_i64(self.attachment_id);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            flush: reader.take_opt_bool()?,
            attachment_id: reader.take_opt_i64()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PauseSessionInput {
    pub flush: Option<bool>,
    pub attachment_id: Option<i64>,
}

impl WirePayload for PauseSessionInput {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.put_opt_bool(self.flush);
        writer.put_opt_i64(self.attachment_id);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            flush: reader.take_opt_bool()?,
            attachment_id: reader.take_opt_i64()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetFlushIntervalInput {
    pub flush_interval: Option<i32>,
    pub attachment_id: Option<i64>,
}

impl WirePayload for SetFlushIntervalInput {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.put_opt_i32(self.flush_interval);
        writer.put_opt_i64(self.attachment_id);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            flush_interval: reader.take_opt_i32()?,
            attachment_id: reader.take_opt_i64()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartSessionInput {
    pub description: Option<String>,
    pub flush_interval: Option<i32>,
    pub attachment_id: Option<i64>,
    pub plugin_name: Option<String>,
    pub plugin_options: Option<String>,
}

impl WirePayload for StartSessionInput {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.put_opt_str(self.description.as_deref())?;
        writer.put_opt_i32(self.flush_interval);
        writer.put_opt_i64(self.attachment_id);
        writer.put_opt_str(self.plugin_name.as_deref())?;
        writer.put_opt_str(self.plugin_options.as_deref())?;
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            description: reader.take_opt_str()?,
            flush_interval: reader.take_opt_i32()?,
            attachment_id: reader.take_opt_i64()?,
            plugin_name: reader.take_opt_str()?,
            plugin_options: reader.take_opt_str()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartSessionOutput {
    pub session_id: Option<i64>,
}

impl WirePayload for StartSessionOutput {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.put_opt_i64(self.session_id);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            session_id: reader.take_opt_i64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<P: WirePayload + PartialEq + std::fmt::Debug>(payload: P) {
        let bytes = payload.encode_to_vec().unwrap();
        let decoded = P::decode_from_slice(&bytes).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn test_tag_numeric_order_is_stable() {
        assert_eq!(Tag::Nop as u8, 0);
        assert_eq!(Tag::Response as u8, 1);
        assert_eq!(Tag::Exception as u8, 2);
        assert_eq!(Tag::StartSession as u8, 10);
        assert_eq!(Tag::from_u8(7), Some(Tag::PauseSession));
        assert_eq!(Tag::from_u8(11), None);
    }

    #[test]
    fn test_attachment_only_payloads() {
        roundtrip(CancelSessionInput {
            attachment_id: Some(42),
        });
        roundtrip(DiscardInput {
            attachment_id: None,
        });
        roundtrip(FlushInput {
            attachment_id: Some(-1),
        });
        roundtrip(ResumeSessionInput {
            attachment_id: Some(7),
        });
    }

    #[test]
    fn test_flush_flag_payloads() {
        roundtrip(FinishSessionInput {
            flush: Some(true),
            attachment_id: Some(3),
        });
        roundtrip(PauseSessionInput {
            flush: None,
            attachment_id: None,
        });
    }

    #[test]
    fn test_set_flush_interval() {
        roundtrip(SetFlushIntervalInput {
            flush_interval: Some(30),
            attachment_id: Some(9),
        });
        roundtrip(SetFlushIntervalInput {
            flush_interval: None,
            attachment_id: None,
        });
    }

    #[test]
    fn test_start_session() {
        roundtrip(StartSessionInput {
            description: Some("nightly batch".to_string()),
            flush_interval: Some(10),
            attachment_id: Some(12),
            plugin_name: Some("default".to_string()),
            plugin_options: None,
        });
        roundtrip(StartSessionOutput {
            session_id: Some(99),
        });
    }

    #[test]
    fn test_short_buffer_is_a_protocol_error() {
        let bytes = StartSessionInput::default().encode_to_vec().unwrap();
        let err = StartSessionInput::decode_from_slice(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_trailing_bytes_are_a_protocol_error() {
        let mut bytes = FlushInput::default().encode_to_vec().unwrap();
        bytes.push(0);
        let err = FlushInput::decode_from_slice(&bytes).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
