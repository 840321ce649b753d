//! Process-level configuration (SPEC_FULL.md §4.9). Scoped down from
//! `axiom::conf`'s file-backed, multi-property `AxConf` (`~/.axiom/conf.txt`,
//! `axiom conf set/get/list/reset`) to the single knob this subsystem
//! actually reads: where (if anywhere) to write the export report.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Process-wide configuration for the bespoke subsystem. Set once, read
/// many times — mirrors the teacher's `OnceLock`-backed globals
/// (`axiom::gc::GC_STATE`-style statics) rather than threading a config
/// struct through every call site.
#[derive(Debug, Clone, Default)]
pub struct BespokeConfig {
    /// Where `ExportCoordinator::export_profiles` writes its report.
    /// `None` means export is a documented no-op (spec.md §6, §7).
    pub export_logging_array_data_path: Option<PathBuf>,
    /// How many simulated arrays the demo binary emits per source before
    /// starting to replay events against them. Not part of spec.md's own
    /// data model; purely a knob for exercising the pipeline.
    pub hot_threshold: u32,
}

impl BespokeConfig {
    pub fn new(export_logging_array_data_path: Option<PathBuf>, hot_threshold: u32) -> Self {
        BespokeConfig {
            export_logging_array_data_path,
            hot_threshold,
        }
    }
}

static CONFIG: OnceLock<BespokeConfig> = OnceLock::new();

/// Installs the process-wide configuration. Idempotent: later calls are
/// ignored once a config is already installed, matching `Registry::finalize`'s
/// one-way-latch idiom elsewhere in this crate.
pub fn install(config: BespokeConfig) {
    let _ = CONFIG.set(config);
}

/// Reads the installed configuration, falling back to defaults if `install`
/// was never called (e.g. a library consumer that drives the tables
/// directly and doesn't use the export path at all).
pub fn get() -> BespokeConfig {
    CONFIG.get().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_export_path() {
        let cfg = BespokeConfig::default();
        assert!(cfg.export_logging_array_data_path.is_none());
        assert_eq!(cfg.hot_threshold, 0);
    }
}
