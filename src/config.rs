//! Instance configuration.

use std::fs;
use std::io::Read;

use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::schedule::DEFAULT_TIMESLICE_NS;
use crate::types::TimeNs;

/// Tunables fixed at instance creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedConfig {
    /// Give every control-domain VCPU a synthetic schedule slot on insert,
    /// growing the major frame by one timeslice each time. Lets the control
    /// domain boot before an operator schedule is installed; production
    /// deployments should install a real schedule before starting any
    /// workload, or turn this off.
    pub control_slot: bool,

    /// Runtime of synthetic control-domain slots, and the idle slice
    /// returned while the schedule is empty.
    pub default_timeslice_ns: TimeNs,
}

impl Default for SchedConfig {
    fn default() -> Self {
        SchedConfig {
            control_slot: true,
            default_timeslice_ns: DEFAULT_TIMESLICE_NS,
        }
    }
}

impl SchedConfig {
    /// Parse a config from a JSON file path or an inline JSON string.
    pub fn parse(input: &str) -> Result<Self> {
        let file = fs::OpenOptions::new().read(true).open(input);
        let config: SchedConfig = match file {
            Ok(mut opened) => {
                let mut content = String::new();
                opened.read_to_string(&mut content)?;
                serde_json::from_str(&content)
            }
            Err(_) => serde_json::from_str(input),
        }?;

        Ok(config)
    }
}
