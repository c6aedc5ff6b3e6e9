//! Call frame housekeeping headers
//!
//! Every call frame begins with a fixed header — protocol version, flags,
//! causality id, optional extension list — ahead of the argument data.
//! Replies carry a smaller header of the same shape.

use orb_ndr::{MarshalStream, Result as NdrResult, UnmarshalStream, MAX_WIRE_ELEMENTS, NdrError};
use uuid::Uuid;

use super::identifiers::generate_causality_id;

/// Protocol version pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// The version this runtime speaks.
    pub const CURRENT: Self = Self { major: 5, minor: 7 };

    pub fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_u16(self.major)?;
        s.put_u16(self.minor)
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        Ok(Self {
            major: s.get_u16()?,
            minor: s.get_u16()?,
        })
    }
}

/// One header extension entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extension {
    pub id: Uuid,
    pub data: Vec<u8>,
}

impl Extension {
    fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_slice(self.id.as_bytes())?;
        s.put_u32(self.data.len() as u32)?;
        s.put_slice(&self.data)?;
        // Entries pad to 8 bytes.
        s.align(8)
    }

    fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let raw = s.copy_bytes(16)?;
        let id = Uuid::from_bytes(raw.as_slice().try_into().expect("sized read"));
        let len = s.get_u32()? as usize;
        if len > MAX_WIRE_ELEMENTS {
            return Err(NdrError::CountLimitExceeded {
                requested: len,
                limit: MAX_WIRE_ELEMENTS,
            });
        }
        let data = s.copy_bytes(len)?;
        s.align(8)?;
        Ok(Self { id, data })
    }
}

fn encode_extensions(extensions: &[Extension], s: &mut MarshalStream) -> NdrResult<()> {
    if extensions.is_empty() {
        s.put_u32(0)
    } else {
        let referent = s.next_referent();
        s.put_u32(referent)?;
        s.put_u32(extensions.len() as u32)?;
        for ext in extensions {
            ext.encode(s)?;
        }
        Ok(())
    }
}

fn decode_extensions(s: &mut UnmarshalStream) -> NdrResult<Vec<Extension>> {
    let referent = s.get_u32()?;
    if referent == 0 {
        return Ok(Vec::new());
    }
    let count = s.get_u32()? as usize;
    if count > MAX_WIRE_ELEMENTS {
        return Err(NdrError::CountLimitExceeded {
            requested: count,
            limit: MAX_WIRE_ELEMENTS,
        });
    }
    let mut extensions = Vec::with_capacity(count);
    for _ in 0..count {
        extensions.push(Extension::decode(s)?);
    }
    Ok(extensions)
}

/// Header prepended to every request frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallHeader {
    pub version: ProtocolVersion,
    pub flags: u32,
    pub reserved: u32,
    /// Identifies the logical call chain this request belongs to.
    pub causality_id: Uuid,
    pub extensions: Vec<Extension>,
}

impl CallHeader {
    pub fn new() -> Self {
        Self::with_causality(generate_causality_id())
    }

    pub fn with_causality(causality_id: Uuid) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            flags: 0,
            reserved: 0,
            causality_id,
            extensions: Vec::new(),
        }
    }

    pub fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        self.version.encode(s)?;
        s.put_u32(self.flags)?;
        s.put_u32(self.reserved)?;
        s.put_slice(self.causality_id.as_bytes())?;
        encode_extensions(&self.extensions, s)
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let version = ProtocolVersion::decode(s)?;
        let flags = s.get_u32()?;
        let reserved = s.get_u32()?;
        let raw = s.copy_bytes(16)?;
        let causality_id = Uuid::from_bytes(raw.as_slice().try_into().expect("sized read"));
        let extensions = decode_extensions(s)?;
        Ok(Self {
            version,
            flags,
            reserved,
            causality_id,
            extensions,
        })
    }
}

impl Default for CallHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Header prepended to every reply frame.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ReplyHeader {
    pub flags: u32,
    pub extensions: Vec<Extension>,
}

impl ReplyHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_u32(self.flags)?;
        encode_extensions(&self.extensions, s)
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let flags = s.get_u32()?;
        let extensions = decode_extensions(s)?;
        Ok(Self { flags, extensions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_ndr::{ByteOrder, Phase};

    #[test]
    fn test_call_header_roundtrip() {
        let header = CallHeader::new();
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        header.encode(&mut s).unwrap();
        let mut r = UnmarshalStream::new(s.finish(), ByteOrder::native(), Phase::InboundRequest);
        assert_eq!(CallHeader::decode(&mut r).unwrap(), header);
    }

    #[test]
    fn test_call_header_with_extensions() {
        let mut header = CallHeader::new();
        header.extensions.push(Extension {
            id: Uuid::from_u128(0x42),
            data: vec![1, 2, 3, 4, 5],
        });
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        header.encode(&mut s).unwrap();
        let mut r = UnmarshalStream::new(s.finish(), ByteOrder::native(), Phase::InboundRequest);
        assert_eq!(CallHeader::decode(&mut r).unwrap(), header);
    }

    #[test]
    fn test_reply_header_roundtrip() {
        let header = ReplyHeader::new();
        let mut s = MarshalStream::new(Phase::OutboundReply);
        header.encode(&mut s).unwrap();
        let mut r = UnmarshalStream::new(s.finish(), ByteOrder::native(), Phase::InboundReply);
        assert_eq!(ReplyHeader::decode(&mut r).unwrap(), header);
    }

    #[test]
    fn test_version_is_current() {
        assert_eq!(CallHeader::new().version, ProtocolVersion::CURRENT);
    }
}
