//! Host capability probe.

use mtekit::MteConfig;
use serde::Serialize;

/// What this build and host can do.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub target_arch: &'static str,
    pub target_os: &'static str,
    /// The CPU implements FEAT_MTE.
    pub hardware_available: bool,
    /// Hardware backend compiled in, if the target has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_backend: Option<&'static str>,
    pub hardware_double_granule: bool,
    pub tag_checks: bool,
    pub alignment: &'static str,
    pub double_granule: bool,
}

#[must_use]
pub fn probe() -> ProbeReport {
    let build = MteConfig::BUILD;
    let (hardware_backend, hardware_double_granule) = hardware_backend();
    ProbeReport {
        target_arch: std::env::consts::ARCH,
        target_os: std::env::consts::OS,
        hardware_available: mtekit::hardware_available(),
        hardware_backend,
        hardware_double_granule,
        tag_checks: build.tag_checks,
        alignment: build.alignment.as_str(),
        double_granule: build.double_granule,
    }
}

#[cfg(target_arch = "aarch64")]
fn hardware_backend() -> (Option<&'static str>, bool) {
    use mtekit::{HardwareBackend, TagBackend};
    (
        Some(HardwareBackend::NAME),
        HardwareBackend::DOUBLE_GRANULE,
    )
}

#[cfg(not(target_arch = "aarch64"))]
fn hardware_backend() -> (Option<&'static str>, bool) {
    (None, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reflects_build_config() {
        let report = probe();
        assert_eq!(report.target_arch, std::env::consts::ARCH);
        assert_eq!(report.tag_checks, MteConfig::BUILD.tag_checks);
        assert_eq!(report.alignment, MteConfig::BUILD.alignment.as_str());
        if !cfg!(target_arch = "aarch64") {
            assert!(!report.hardware_available);
            assert!(report.hardware_backend.is_none());
        }
    }
}
