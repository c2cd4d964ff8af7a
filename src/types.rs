//! Newtype wrappers and type aliases for domain concepts.
//!
//! Newtypes for identifiers (domain handles, domain ids, PCPU ids) prevent
//! silent type confusion. A type alias for nanosecond timestamps provides
//! self-documenting code without the boilerplate of arithmetic traits.

use std::fmt;

/// Scheduler time in nanoseconds. Signed, matching the control-plane wire
/// format; slice arithmetic relies on ordinary subtraction.
pub type TimeNs = i64;

pub const NSEC_PER_MSEC: TimeNs = 1_000_000;

/// Opaque 16-byte domain handle ("UUID"). Compared bytewise; ordering is
/// lexicographic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DomainHandle(pub [u8; 16]);

impl DomainHandle {
    pub const ZERO: DomainHandle = DomainHandle([0; 16]);

    /// Handle whose 16 bytes are all `b`. Convenient for fixtures.
    pub const fn splat(b: u8) -> DomainHandle {
        DomainHandle([b; 16])
    }
}

impl fmt::Debug for DomainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Numeric domain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomId(pub i32);

impl DomId {
    /// The control domain: its VCPUs may receive synthetic schedule slots
    /// before an operator schedule is installed.
    pub const CONTROL: DomId = DomId(0);
}

impl fmt::Display for DomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical CPU identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PcpuId(pub u32);

/// The `(domain handle, vcpu id)` pair a schedule provider names. Two VCPUs
/// with different keys are distinct even if they transiently resolve to the
/// same host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VcpuKey {
    pub handle: DomainHandle,
    pub vcpu_id: i32,
}

impl VcpuKey {
    pub fn new(handle: DomainHandle, vcpu_id: i32) -> Self {
        VcpuKey { handle, vcpu_id }
    }
}
