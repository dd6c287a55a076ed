pub mod error;
pub mod field;
pub mod formater;
pub mod helper;
pub mod host;
pub mod memory;
pub mod parser;
pub mod peripheral;
pub mod register;
pub mod script;

use std::fmt;
use std::path::Path;

use log::{info, warn};

pub use crate::error::{Error, ParseError, PeripheralError};
pub use crate::host::{AddressSpace, MemorySpace};
pub use crate::memory::Binding;
pub use crate::peripheral::Peripheral;
pub use crate::script::ScriptSpace;

pub const ALIGN_BITS: u32 = 8; // minimum segment granularity is 0x100 bytes
pub const SEGMENT_GRANULE: u64 = 1 << ALIGN_BITS;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// the host's global comment toggle, read once per import
    pub comments: bool,
    /// cpu selector for `sif`/`elif` blocks; `None` matches every
    /// condition
    pub cpu: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            comments: true,
            cpu: None,
        }
    }
}

/// One peripheral that could not be mapped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub peripheral: String,
    pub error: PeripheralError,
}

/// Aggregate result of one import run.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub bindings: Vec<Binding>,
    pub failures: Vec<Failure>,
}

impl ImportReport {
    pub fn mapped(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mapped {} peripheral(s), {} failure(s)",
            self.bindings.len(),
            self.failures.len(),
        )?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.peripheral, failure.error)?;
        }
        Ok(())
    }
}

/// Import a `.per` file into the given address space.
pub fn import_per_file(
    path: impl AsRef<Path>,
    space: &mut dyn AddressSpace,
    opts: &ImportOptions,
) -> Result<ImportReport, Error> {
    let src = std::fs::read_to_string(path.as_ref())?;
    import_per(&src, space, opts)
}

/// Import already-loaded `.per` source into the given address space.
///
/// Parse and model failures are fatal and happen before any mutation.
/// Mapper failures are collected per peripheral, one bad block never
/// stops the rest of the file.
pub fn import_per(
    src: &str,
    space: &mut dyn AddressSpace,
    opts: &ImportOptions,
) -> Result<ImportReport, Error> {
    let decls = parser::parse(src, opts.cpu.as_deref())?;
    let model = peripheral::build(&decls)?;

    let mut report = ImportReport {
        bindings: Vec::with_capacity(model.peripherals.len()),
        failures: model.rejected,
    };
    for failure in &report.failures {
        warn!("rejected {}: {}", failure.peripheral, failure.error);
    }
    for per in &model.peripherals {
        match memory::map_peripheral(space, per, opts) {
            Ok(binding) => {
                info!("mapped {} at {:#x}", binding.peripheral, binding.base);
                report.bindings.push(binding);
            }
            Err(error) => {
                warn!("skipping {}: {error}", per.name);
                report.failures.push(Failure {
                    peripheral: per.name.clone(),
                    error,
                });
            }
        }
    }
    Ok(report)
}
