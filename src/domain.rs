//! Per-domain scheduler state.
//!
//! Each domain carries a parent id, a primary flag, and a health flag. The
//! health flag is the live filter applied at provider election; the primary
//! flag is maintained from the parent relation but not consulted by the
//! dispatcher (provider order in the schedule entry encodes preference).

use crate::types::DomId;

/// Scheduler-private record for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainInfo {
    pub parent: DomId,
    pub primary: bool,
    pub healthy: bool,
}

impl DomainInfo {
    /// A fresh domain is its own parent, primary, and healthy.
    pub fn new(dom: DomId) -> Self {
        DomainInfo {
            parent: dom,
            primary: true,
            healthy: true,
        }
    }

    /// Apply a control-plane parameter write. A parent of -1 leaves the
    /// parent relation unchanged; the health flag is always taken.
    pub fn apply(&mut self, dom: DomId, params: &DomainParams) {
        if params.parent != -1 {
            self.parent = DomId(params.parent);
            self.primary = self.parent == dom;
        }
        self.healthy = params.healthy;
    }
}

/// Control-plane view of the adjustable domain parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainParams {
    /// New parent domain id, or -1 to leave the parent unchanged.
    pub parent: i32,
    pub healthy: bool,
}

impl DomainParams {
    pub fn from_info(info: &DomainInfo) -> Self {
        DomainParams {
            parent: info.parent.0,
            healthy: info.healthy,
        }
    }
}
