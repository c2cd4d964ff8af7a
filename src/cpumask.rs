//! CPU masks over a bit vector.
//!
//! A `Cpumask` is a `BitVec` of u64's sized to the host's PCPU count, with
//! the few operations CPU assignment needs: set a bit, test a bit, find the
//! first online PCPU. Unlike a kernel-style global, the width travels with
//! the mask so independent scheduler instances can serve hosts of different
//! sizes.

use anyhow::bail;
use anyhow::Result;
use bitvec::prelude::*;

#[derive(Debug, Eq, Clone, Hash, Ord, PartialEq, PartialOrd)]
pub struct Cpumask {
    mask: BitVec<u64, Lsb0>,
}

impl Cpumask {
    fn check_cpu(&self, cpu: usize) -> Result<()> {
        if cpu >= self.mask.len() {
            bail!("Invalid CPU {} passed, max {}", cpu, self.mask.len());
        }

        Ok(())
    }

    /// Build a new empty Cpumask covering `nr_cpus` PCPUs.
    pub fn new(nr_cpus: usize) -> Cpumask {
        Cpumask {
            mask: bitvec![u64, Lsb0; 0; nr_cpus],
        }
    }

    /// Build a Cpumask with all `nr_cpus` bits set.
    pub fn all(nr_cpus: usize) -> Cpumask {
        Cpumask {
            mask: bitvec![u64, Lsb0; 1; nr_cpus],
        }
    }

    /// Set a bit in the Cpumask. Returns an error if the specified CPU
    /// exceeds the size of the Cpumask.
    pub fn set_cpu(&mut self, cpu: usize) -> Result<()> {
        self.check_cpu(cpu)?;
        self.mask.set(cpu, true);
        Ok(())
    }

    /// Test whether the specified CPU bit is set in the Cpumask. If the CPU
    /// exceeds the mask width, false is returned.
    pub fn test_cpu(&self, cpu: usize) -> bool {
        match self.mask.get(cpu) {
            Some(bit) => *bit,
            None => false,
        }
    }

    /// Index of the first set bit, if any.
    pub fn first(&self) -> Option<usize> {
        self.mask.first_one()
    }
}
