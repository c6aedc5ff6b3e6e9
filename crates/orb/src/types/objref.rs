//! Reference records
//!
//! A reference record is produced whenever an interface pointer crosses
//! the export boundary and consumed to construct or extend a proxy. Wire
//! layout, in order:
//!
//! ```text
//! u32 signature ("MEOW") | u32 flags | 16-byte IID | u32 std flags |
//! u32 public ref count | u64 OXID | u64 OID | 16-byte IPID |
//! dual-string address array
//! ```
//!
//! Only the standard variant exists; custom and handler marshaling are not
//! part of this runtime.

use bytes::Bytes;
use orb_ndr::{ByteOrder, MarshalStream, Phase, UnmarshalStream};

use super::addr::DualStringArray;
use super::error::{OrbError, Result};
use super::identifiers::{Iid, Ipid, Oid, Oxid};

/// Record signature ("MEOW" when read as little-endian ASCII).
pub const REF_SIGNATURE: u32 = 0x574F_454D;

/// Record variant flags.
pub mod ref_flags {
    /// Standard reference record
    pub const STANDARD: u32 = 0x0000_0001;
}

/// Flags of the standard reference body.
pub mod std_flags {
    /// Plain reference
    pub const NONE: u32 = 0x0000_0000;
    /// Reference that does not participate in pinging
    pub const NOPING: u32 = 0x0000_1000;
}

/// The standard reference body: who exports what, and how many public
/// references travel with this record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StdRef {
    pub flags: u32,
    pub public_refs: u32,
    pub oxid: Oxid,
    pub oid: Oid,
    pub ipid: Ipid,
}

impl StdRef {
    pub fn new(oxid: Oxid, oid: Oid, ipid: Ipid, public_refs: u32) -> Self {
        Self {
            flags: std_flags::NONE,
            public_refs,
            oxid,
            oid,
            ipid,
        }
    }

    /// A reference whose lease is not renewed by pinging.
    pub fn new_noping(oxid: Oxid, oid: Oid, ipid: Ipid, public_refs: u32) -> Self {
        Self {
            flags: std_flags::NOPING,
            ..Self::new(oxid, oid, ipid, public_refs)
        }
    }

    pub fn requires_pinging(&self) -> bool {
        self.flags & std_flags::NOPING == 0
    }

    pub fn encode(&self, s: &mut MarshalStream) -> orb_ndr::Result<()> {
        s.put_u32(self.flags)?;
        s.put_u32(self.public_refs)?;
        self.oxid.encode(s)?;
        self.oid.encode(s)?;
        self.ipid.encode(s)
    }

    pub fn decode(s: &mut UnmarshalStream) -> orb_ndr::Result<Self> {
        Ok(Self {
            flags: s.get_u32()?,
            public_refs: s.get_u32()?,
            oxid: Oxid::decode(s)?,
            oid: Oid::decode(s)?,
            ipid: Ipid::decode(s)?,
        })
    }
}

/// A complete reference record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefRecord {
    pub iid: Iid,
    pub std: StdRef,
    pub resolver: DualStringArray,
}

impl RefRecord {
    pub fn new(iid: Iid, std: StdRef, resolver: DualStringArray) -> Self {
        Self { iid, std, resolver }
    }

    pub fn encode(&self, s: &mut MarshalStream) -> orb_ndr::Result<()> {
        s.put_u32(REF_SIGNATURE)?;
        s.put_u32(ref_flags::STANDARD)?;
        self.iid.encode(s)?;
        self.std.encode(s)?;
        self.resolver.encode(s)
    }

    pub fn decode(s: &mut UnmarshalStream) -> Result<Self> {
        let signature = s.get_u32().map_err(OrbError::Wire)?;
        if signature != REF_SIGNATURE {
            return Err(OrbError::InvalidFrame(format!(
                "bad reference record signature 0x{signature:08x}"
            )));
        }
        let flags = s.get_u32().map_err(OrbError::Wire)?;
        if flags != ref_flags::STANDARD {
            return Err(OrbError::InvalidFrame(format!(
                "unsupported reference record flags 0x{flags:08x}"
            )));
        }
        let iid = Iid::decode(s)?;
        let std = StdRef::decode(s)?;
        let resolver = DualStringArray::decode(s)?;
        Ok(Self { iid, std, resolver })
    }

    /// Render the record standalone, in the local byte order.
    pub fn to_bytes(&self) -> orb_ndr::Result<Bytes> {
        let mut s = MarshalStream::new(Phase::OutboundReply);
        self.encode(&mut s)?;
        Ok(s.finish())
    }

    /// Parse a standalone record.
    pub fn from_bytes(bytes: Bytes) -> Result<Self> {
        let mut s = UnmarshalStream::new(bytes, ByteOrder::native(), Phase::InboundReply);
        Self::decode(&mut s)
    }
}
