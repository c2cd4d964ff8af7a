//! Control-plane surface: error kinds, the fixed-shape wire structs, and the
//! byte-level entry points the host transport calls.
//!
//! The wire layout is the classic fixed-capacity struct copy: one
//! `#[repr(C)]` block whose live prefix is described by its count fields.
//! Struct sizes are pinned by compile-time asserts so the transport and the
//! scheduler cannot drift apart.

use std::mem::size_of;

use plain::Plain;
use thiserror::Error;

use crate::domain::DomainParams;
use crate::host::Host;
use crate::sched::Scheduler;
use crate::schedule::{EntryPlan, SchedulePlan, MAX_ENTRIES, MAX_PROVIDERS};
use crate::types::{DomId, DomainHandle, VcpuKey};

/// Errors surfaced to the control plane. Fatal invariant violations are not
/// here: those halt the system by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedError {
    /// The request failed shape or feasibility checks; nothing was changed.
    #[error("invalid argument")]
    InvalidArgument,
    /// The caller's buffer was too short or unreadable; nothing was changed.
    #[error("bad buffer")]
    Fault,
}

/// One provider on the wire: the domain handle plus the VCPU number.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WireProvider {
    pub dom_handle: [u8; 16],
    pub vcpu_id: i32,
}

/// One schedule entry on the wire. Explicit padding keeps the layout
/// identical on every target.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WireEntry {
    pub service_id: i32,
    pub _pad0: u32,
    pub runtime: i64,
    pub nr_providers: u32,
    pub providers: [WireProvider; MAX_PROVIDERS],
    pub _pad1: u32,
}

/// The full schedule message, for both install and read-back. Only the first
/// `nr_entries` entries are meaningful; on read-back the rest is poison
/// (0xFF) so trailing garbage is detectable from `nr_entries` alone.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct WireSchedule {
    pub major_frame: i64,
    pub nr_entries: u32,
    pub _pad0: u32,
    pub entries: [WireEntry; MAX_ENTRIES],
}

/// Per-domain parameter message.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WireDomainParams {
    /// New parent domain id; -1 means "do not change" on a put.
    pub parent: i32,
    pub healthy: u8,
    pub _pad: [u8; 3],
}

unsafe impl Plain for WireProvider {}
unsafe impl Plain for WireEntry {}
unsafe impl Plain for WireSchedule {}
unsafe impl Plain for WireDomainParams {}

pub const WIRE_PROVIDER_SIZE: usize = 20;
pub const WIRE_ENTRY_SIZE: usize = 184;
pub const WIRE_SCHEDULE_SIZE: usize = 16 + MAX_ENTRIES * WIRE_ENTRY_SIZE;
pub const WIRE_DOMAIN_PARAMS_SIZE: usize = 8;

const _: () = assert!(size_of::<WireProvider>() == WIRE_PROVIDER_SIZE);
const _: () = assert!(size_of::<WireEntry>() == WIRE_ENTRY_SIZE);
const _: () = assert!(size_of::<WireSchedule>() == WIRE_SCHEDULE_SIZE);
const _: () = assert!(size_of::<WireDomainParams>() == WIRE_DOMAIN_PARAMS_SIZE);

impl WireSchedule {
    /// A message whose every byte is poison. Encoding starts from this so
    /// unused trailing entries stay recognizably invalid.
    fn poisoned() -> Self {
        let mut wire: WireSchedule = unsafe { std::mem::zeroed() };
        unsafe {
            std::ptr::write_bytes(
                &mut wire as *mut WireSchedule as *mut u8,
                0xff,
                size_of::<WireSchedule>(),
            );
        }
        wire
    }

    pub fn from_plan(plan: &SchedulePlan) -> Self {
        let mut wire = Self::poisoned();
        wire.major_frame = plan.major_frame;
        wire.nr_entries = plan.entries.len() as u32;
        wire._pad0 = 0;
        for (slot, entry) in plan.entries.iter().enumerate() {
            let out = &mut wire.entries[slot];
            out.service_id = entry.service_id;
            out._pad0 = 0;
            out.runtime = entry.runtime;
            out.nr_providers = entry.providers.len() as u32;
            out._pad1 = 0;
            for (i, key) in entry.providers.iter().enumerate() {
                out.providers[i] = WireProvider {
                    dom_handle: key.handle.0,
                    vcpu_id: key.vcpu_id,
                };
            }
            for unused in &mut out.providers[entry.providers.len()..] {
                *unused = WireProvider {
                    dom_handle: [0xff; 16],
                    vcpu_id: -1,
                };
            }
        }
        wire
    }

    /// Lift the live prefix into a plan. Count fields are range-checked here
    /// so decoding never indexes past the arrays; the semantic checks
    /// (runtimes, feasibility) happen at install validation.
    pub fn to_plan(&self) -> Result<SchedulePlan, SchedError> {
        let nr_entries = self.nr_entries as usize;
        if nr_entries > MAX_ENTRIES {
            return Err(SchedError::InvalidArgument);
        }

        let mut entries = Vec::with_capacity(nr_entries);
        for entry in &self.entries[..nr_entries] {
            let nr_providers = entry.nr_providers as usize;
            if nr_providers > MAX_PROVIDERS {
                return Err(SchedError::InvalidArgument);
            }
            entries.push(EntryPlan {
                service_id: entry.service_id,
                runtime: entry.runtime,
                providers: entry.providers[..nr_providers]
                    .iter()
                    .map(|p| VcpuKey::new(DomainHandle(p.dom_handle), p.vcpu_id))
                    .collect(),
            });
        }

        Ok(SchedulePlan {
            major_frame: self.major_frame,
            entries,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self as *const WireSchedule as *const u8, size_of::<Self>())
        }
    }
}

impl WireDomainParams {
    pub fn from_params(params: &DomainParams) -> Self {
        WireDomainParams {
            parent: params.parent,
            healthy: params.healthy as u8,
            _pad: [0; 3],
        }
    }

    pub fn to_params(&self) -> DomainParams {
        DomainParams {
            parent: self.parent,
            healthy: self.healthy != 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(
                self as *const WireDomainParams as *const u8,
                size_of::<Self>(),
            )
        }
    }
}

impl<H: Host> Scheduler<H> {
    /// Decode and install a schedule message.
    pub fn install_schedule_bytes(&self, buf: &[u8]) -> Result<(), SchedError> {
        let mut wire: WireSchedule = unsafe { std::mem::zeroed() };
        plain::copy_from_bytes(&mut wire, buf).map_err(|_| SchedError::Fault)?;
        let plan = wire.to_plan()?;
        self.install_schedule(&plan)
    }

    /// Encode the current schedule into the caller's buffer, poison-filled
    /// past the live entries.
    pub fn read_schedule_bytes(&self, buf: &mut [u8]) -> Result<(), SchedError> {
        if buf.len() < WIRE_SCHEDULE_SIZE {
            return Err(SchedError::Fault);
        }
        let wire = WireSchedule::from_plan(&self.schedule());
        buf[..WIRE_SCHEDULE_SIZE].copy_from_slice(wire.as_bytes());
        Ok(())
    }

    /// Decode and apply a domain parameter write.
    pub fn put_domain_info_bytes(&self, dom: DomId, buf: &[u8]) -> Result<(), SchedError> {
        let mut wire: WireDomainParams = unsafe { std::mem::zeroed() };
        plain::copy_from_bytes(&mut wire, buf).map_err(|_| SchedError::Fault)?;
        self.set_domain_params(dom, &wire.to_params())
    }

    /// Encode a domain's parameters into the caller's buffer.
    pub fn get_domain_info_bytes(&self, dom: DomId, buf: &mut [u8]) -> Result<(), SchedError> {
        if buf.len() < WIRE_DOMAIN_PARAMS_SIZE {
            return Err(SchedError::Fault);
        }
        let params = self.domain_params(dom)?;
        let wire = WireDomainParams::from_params(&params);
        buf[..WIRE_DOMAIN_PARAMS_SIZE].copy_from_slice(wire.as_bytes());
        Ok(())
    }
}
