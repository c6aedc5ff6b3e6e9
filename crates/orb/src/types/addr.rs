//! Resolver address bindings
//!
//! A reference record ends with a dual-string array: two back-to-back runs
//! of NUL-terminated wide-character strings (network bindings, then
//! security bindings), each run terminated by an extra NUL, with a leading
//! {total length, security-info offset} pair counted in 16-bit units.

use std::fmt;

use orb_ndr::{MarshalStream, NdrError, Result as NdrResult, UnmarshalStream};

/// Protocol identifiers carried in a string binding.
pub mod protocol_id {
    /// TCP/IP byte stream
    pub const TCP: u16 = 0x07;
    /// Same-host IPC
    pub const LOCAL: u16 = 0x10;
    /// In-process loopback (tests and demos)
    pub const LOOPBACK: u16 = 0x7F;
}

/// A single network binding: protocol tag plus address string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringBinding {
    pub protocol: u16,
    pub network_addr: String,
}

impl StringBinding {
    pub fn new(protocol: u16, network_addr: impl Into<String>) -> Self {
        Self {
            protocol,
            network_addr: network_addr.into(),
        }
    }

    pub fn tcp(addr: &str) -> Self {
        Self::new(protocol_id::TCP, addr)
    }

    pub fn loopback(name: &str) -> Self {
        Self::new(protocol_id::LOOPBACK, name)
    }

    /// Encoded size in 16-bit units: tag + chars + NUL.
    fn unit_len(&self) -> usize {
        1 + self.network_addr.encode_utf16().count() + 1
    }

    fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_u16(self.protocol)?;
        for unit in self.network_addr.encode_utf16() {
            s.put_u16(unit)?;
        }
        s.put_u16(0)
    }
}

impl fmt::Display for StringBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.protocol {
            protocol_id::TCP => "tcp",
            protocol_id::LOCAL => "local",
            protocol_id::LOOPBACK => "loopback",
            _ => "unknown",
        };
        write!(f, "{}:{}", proto, self.network_addr)
    }
}

/// A single security binding: service tags plus principal name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityBinding {
    pub authn_svc: u16,
    pub authz_svc: u16,
    pub principal: String,
}

impl SecurityBinding {
    pub fn new(authn_svc: u16, authz_svc: u16, principal: impl Into<String>) -> Self {
        Self {
            authn_svc,
            authz_svc,
            principal: principal.into(),
        }
    }

    /// No authentication.
    pub fn none() -> Self {
        Self::new(0, 0, "")
    }

    fn unit_len(&self) -> usize {
        2 + self.principal.encode_utf16().count() + 1
    }

    fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        s.put_u16(self.authn_svc)?;
        s.put_u16(self.authz_svc)?;
        for unit in self.principal.encode_utf16() {
            s.put_u16(unit)?;
        }
        s.put_u16(0)
    }
}

/// The resolver address list of a reference record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DualStringArray {
    pub bindings: Vec<StringBinding>,
    pub security: Vec<SecurityBinding>,
}

impl DualStringArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(binding: StringBinding) -> Self {
        Self {
            bindings: vec![binding],
            security: Vec::new(),
        }
    }

    pub fn with_tcp(addr: &str) -> Self {
        Self::with_binding(StringBinding::tcp(addr))
    }

    pub fn add_binding(&mut self, binding: StringBinding) {
        self.bindings.push(binding);
    }

    pub fn add_security(&mut self, binding: SecurityBinding) {
        self.security.push(binding);
    }

    /// The first binding's address, if any.
    pub fn primary_addr(&self) -> Option<&str> {
        self.bindings.first().map(|b| b.network_addr.as_str())
    }

    pub fn encode(&self, s: &mut MarshalStream) -> NdrResult<()> {
        // Both header fields count 16-bit units. The binding run ends with
        // an extra NUL, as does the security run.
        let binding_units: usize = self.bindings.iter().map(StringBinding::unit_len).sum::<usize>() + 1;
        let security_units: usize =
            self.security.iter().map(SecurityBinding::unit_len).sum::<usize>() + 1;

        s.put_u16((binding_units + security_units) as u16)?;
        s.put_u16(binding_units as u16)?;

        for binding in &self.bindings {
            binding.encode(s)?;
        }
        s.put_u16(0)?;

        for sec in &self.security {
            sec.encode(s)?;
        }
        s.put_u16(0)
    }

    pub fn decode(s: &mut UnmarshalStream) -> NdrResult<Self> {
        let total_units = s.get_u16()? as usize;
        let security_offset = s.get_u16()? as usize;
        if security_offset > total_units {
            return Err(NdrError::InvalidString(
                "security offset past end of dual-string array".into(),
            ));
        }

        let mut bindings = Vec::new();
        let mut consumed = 0usize;
        while consumed < security_offset {
            let protocol = s.get_u16()?;
            consumed += 1;
            if protocol == 0 {
                break;
            }
            let (addr, units) = read_wide_run(s)?;
            consumed += units;
            bindings.push(StringBinding {
                protocol,
                network_addr: addr,
            });
        }
        // Skip any slack before the security run.
        while consumed < security_offset {
            s.get_u16()?;
            consumed += 1;
        }

        let mut security = Vec::new();
        while consumed < total_units {
            let authn_svc = s.get_u16()?;
            consumed += 1;
            if authn_svc == 0 {
                break;
            }
            let authz_svc = s.get_u16()?;
            consumed += 1;
            let (principal, units) = read_wide_run(s)?;
            consumed += units;
            security.push(SecurityBinding {
                authn_svc,
                authz_svc,
                principal,
            });
        }
        while consumed < total_units {
            s.get_u16()?;
            consumed += 1;
        }

        Ok(Self { bindings, security })
    }
}

/// Read one NUL-terminated wide run; returns the string and the unit count
/// consumed (terminator included).
fn read_wide_run(s: &mut UnmarshalStream) -> NdrResult<(String, usize)> {
    let mut units = Vec::new();
    loop {
        let unit = s.get_u16()?;
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    let text = String::from_utf16(&units)
        .map_err(|e| NdrError::InvalidString(e.to_string()))?;
    let consumed = units.len() + 1;
    Ok((text, consumed))
}
