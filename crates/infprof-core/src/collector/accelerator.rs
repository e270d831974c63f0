//! Accelerator backend seam.
//!
//! Vendor libraries are reached only through [`AcceleratorBackend`]. A host
//! without a supported library runs with [`NoAccelerator`] and reports zero
//! devices.

use crate::model::{AcceleratorRecord, AcceleratorStatic};

pub trait AcceleratorBackend: Send {
    /// Short backend identifier recorded in the static info.
    fn name(&self) -> &str;

    fn driver_version(&self) -> Option<String> {
        None
    }

    /// Static capabilities, queried once per run.
    fn static_devices(&mut self) -> Vec<AcceleratorStatic>;

    /// One dynamic record per installed device. Per-device process lists
    /// are filled only when `with_processes` is set.
    fn sample(&mut self, with_processes: bool) -> Vec<AcceleratorRecord>;

    /// Releases the vendor handle. Safe to call more than once.
    fn close(&mut self);
}

/// Backend for hosts without accelerators.
#[derive(Debug, Default)]
pub struct NoAccelerator {
    closed: bool,
}

impl NoAccelerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AcceleratorBackend for NoAccelerator {
    fn name(&self) -> &str {
        "none"
    }

    fn static_devices(&mut self) -> Vec<AcceleratorStatic> {
        Vec::new()
    }

    fn sample(&mut self, _with_processes: bool) -> Vec<AcceleratorRecord> {
        Vec::new()
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
