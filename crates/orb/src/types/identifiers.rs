//! Runtime identifier types
//!
//! Three identifiers tie the runtime together:
//! - OXID: one per hosting process, seeded from the host network address
//! - OID: one per exported object, allocated on first export
//! - IPID: one per exposed interface, the dispatch routing key
//!
//! plus SETID (names a ping set) and the IID/CLSID pair of 128-bit type
//! identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use orb_ndr::{MarshalStream, Result as NdrResult, UnmarshalStream};
use uuid::Uuid;

/// Mix function used wherever an identifier is derived rather than
/// allocated. Deterministic: same input, same output, always.
pub(crate) fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Object Exporter Identifier (8 bytes)
///
/// One per hosting process, assigned once at startup. Seeded from the
/// host's network address so two exporters on different machines cannot
/// collide even if their local counters agree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Oxid(pub u64);

impl Oxid {
    /// Size of OXID in bytes
    pub const SIZE: usize = 8;

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Derive the process OXID from the exporter's network address and a
    /// startup timestamp.
    pub fn seeded(network_addr: &str) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let mut acc = 0u64;
        for chunk in network_addr.as_bytes().chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            acc = splitmix64(acc ^ u64::from_le_bytes(word));
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        // Address hash occupies the high half; the low half varies per
        // process start.
        Self((acc & 0xFFFF_FFFF_0000_0000) | (splitmix64(nanos) & 0x0000_0000_FFFF_FFFF))
    }

    pub fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_u64(self.0)
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        Ok(Self(s.get_u64()?))
    }
}

impl fmt::Debug for Oxid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OXID({:016x})", self.0)
    }
}

impl fmt::Display for Oxid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Object Identifier (8 bytes)
///
/// Unique for the lifetime of one object within one exporter; assigned the
/// first time the object is exported and never reused while any reference
/// to it is outstanding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Oid(pub u64);

impl Oid {
    /// Size of OID in bytes
    pub const SIZE: usize = 8;

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_u64(self.0)
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        Ok(Self(s.get_u64()?))
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OID({:016x})", self.0)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Monotonic OID source, one per exporter.
///
/// Values are never handed out twice, so an OID cannot be reused while a
/// stale reference to it is still in flight.
#[derive(Debug)]
pub struct OidAllocator {
    next: AtomicU64,
}

impl OidAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> Oid {
        Oid(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for OidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Interface Pointer Identifier (16 bytes)
///
/// A pure function of the local interface-pointer value and the OID it is
/// exported under: re-exporting the same pointer under the same OID always
/// yields the same IPID. It doubles as the dispatch routing key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipid(pub Uuid);

impl Ipid {
    /// Size of IPID in bytes
    pub const SIZE: usize = 16;

    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Derive the IPID for an interface pointer exported under `oid`.
    pub fn derive(pointer: u64, oid: Oid) -> Self {
        let hi = splitmix64(pointer ^ oid.0.rotate_left(17));
        let lo = splitmix64(oid.0 ^ pointer.rotate_right(23));
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&hi.to_be_bytes());
        bytes[8..].copy_from_slice(&lo.to_be_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_slice(self.0.as_bytes())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let raw = s.copy_bytes(Self::SIZE)?;
        let bytes: [u8; 16] = raw.as_slice().try_into().expect("sized read");
        Ok(Self(Uuid::from_bytes(bytes)))
    }
}

impl Default for Ipid {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Debug for Ipid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPID({})", self.0)
    }
}

impl fmt::Display for Ipid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ping Set Identifier (8 bytes)
///
/// Names a group of OIDs whose leases are renewed together. Scoped to one
/// transport session; a reconnecting client starts over with a fresh set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SetId(pub u64);

impl SetId {
    /// Size of SETID in bytes
    pub const SIZE: usize = 8;

    /// The reserved "allocate a set for me" value.
    pub const NONE: SetId = SetId(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_u64(self.0)
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        Ok(Self(s.get_u64()?))
    }
}

impl fmt::Debug for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SETID({:016x})", self.0)
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Interface identifier (16 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Iid(pub Uuid);

impl Iid {
    /// Size of IID in bytes
    pub const SIZE: usize = 16;

    /// The base identity interface every exported object carries.
    pub const BASE: Iid = Iid(Uuid::from_u128(0x0000_0000_0000_0000_C000_0000_0000_0046));

    pub const fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }

    pub fn is_base(&self) -> bool {
        *self == Self::BASE
    }

    pub fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_slice(self.0.as_bytes())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let raw = s.copy_bytes(Self::SIZE)?;
        let bytes: [u8; 16] = raw.as_slice().try_into().expect("sized read");
        Ok(Self(Uuid::from_bytes(bytes)))
    }
}

impl fmt::Debug for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IID({})", self.0)
    }
}

impl fmt::Display for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Class identifier (16 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Clsid(pub Uuid);

impl Clsid {
    /// Size of CLSID in bytes
    pub const SIZE: usize = 16;

    pub const fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }

    pub fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_slice(self.0.as_bytes())
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let raw = s.copy_bytes(Self::SIZE)?;
        let bytes: [u8; 16] = raw.as_slice().try_into().expect("sized read");
        Ok(Self(Uuid::from_bytes(bytes)))
    }
}

impl fmt::Debug for Clsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CLSID({})", self.0)
    }
}

impl fmt::Display for Clsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generate a fresh causality id for a new call chain.
pub fn generate_causality_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_ndr::{ByteOrder, Phase};

    #[test]
    fn test_oid_allocator_is_monotonic() {
        let alloc = OidAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_ipid_derivation_is_deterministic() {
        let oid = Oid::new(42);
        let a = Ipid::derive(0x1000, oid);
        let b = Ipid::derive(0x1000, oid);
        assert_eq!(a, b);

        // Different pointer or different OID must not collide here.
        assert_ne!(a, Ipid::derive(0x1008, oid));
        assert_ne!(a, Ipid::derive(0x1000, Oid::new(43)));
    }

    #[test]
    fn test_oxid_address_half_is_stable() {
        let a = Oxid::seeded("192.168.0.1:4100");
        let b = Oxid::seeded("192.168.0.1:4100");
        let c = Oxid::seeded("10.0.0.9:4100");
        assert_eq!(a.0 >> 32, b.0 >> 32);
        assert_ne!(a.0 >> 32, c.0 >> 32);
    }

    #[test]
    fn test_identifier_wire_roundtrip() {
        let mut s = MarshalStream::new(Phase::OutboundRequest);
        let oxid = Oxid::new(0x1234_5678_9ABC_DEF0);
        let oid = Oid::new(0xFEDC_BA98_7654_3210);
        let ipid = Ipid::derive(0xDEAD, oid);
        let iid = Iid::from_u128(7);
        oxid.encode(&mut s).unwrap();
        oid.encode(&mut s).unwrap();
        ipid.encode(&mut s).unwrap();
        iid.encode(&mut s).unwrap();

        let mut r = UnmarshalStream::new(s.finish(), ByteOrder::native(), Phase::InboundRequest);
        assert_eq!(Oxid::decode(&mut r).unwrap(), oxid);
        assert_eq!(Oid::decode(&mut r).unwrap(), oid);
        assert_eq!(Ipid::decode(&mut r).unwrap(), ipid);
        assert_eq!(Iid::decode(&mut r).unwrap(), iid);
    }
}
