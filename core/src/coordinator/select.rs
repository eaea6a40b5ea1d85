//! Backend selection for the Deciding step.

use std::collections::BTreeSet;

use crate::backend::{BackendCapabilities, BackendKind};
use crate::config::ExecutionSettings;
use crate::rewriter::HostCapability;

/// Which backend to run on, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub backend: BackendKind,
    pub reason: &'static str,
}

impl Selection {
    fn isolated(reason: &'static str) -> Self {
        Self {
            backend: BackendKind::Isolated,
            reason,
        }
    }

    fn fallback(reason: &'static str) -> Self {
        Self {
            backend: BackendKind::Subprocess,
            reason,
        }
    }
}

/// Pick a backend from declared capabilities only.
///
/// The isolated backend is chosen when it is preferred, available, fallback
/// is not forced, and it covers every required capability the fallback
/// covers. Capabilities the fallback lacks too (audio) are ignored. When the
/// fallback cannot run at all, capability gaps other than modules still go to
/// the isolated backend, whose stubs report the missing binding.
pub fn choose_backend(
    settings: &ExecutionSettings,
    required: &BTreeSet<HostCapability>,
    isolated: &dyn BackendCapabilities,
    fallback: &dyn BackendCapabilities,
) -> Selection {
    if settings.force_subprocess {
        return Selection::fallback("forced");
    }
    if !settings.prefer_isolated {
        return Selection::fallback("isolated not preferred");
    }
    if !isolated.is_available() {
        return Selection::fallback("isolated unavailable");
    }
    if required.contains(&HostCapability::Modules) && !isolated.supports_modules() {
        return Selection::fallback("module loading");
    }

    let missing = required.iter().any(|capability| {
        *capability != HostCapability::Modules
            && !isolated.supports_host_capability(*capability)
            && fallback.supports_host_capability(*capability)
    });
    if missing && fallback.is_available() {
        return Selection::fallback("host capability");
    }

    Selection::isolated("default")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Declared {
        kind: BackendKind,
        modules: bool,
        capabilities: &'static [HostCapability],
        available: bool,
    }

    impl BackendCapabilities for Declared {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn supports_modules(&self) -> bool {
            self.modules
        }

        fn supports_host_capability(&self, capability: HostCapability) -> bool {
            self.capabilities.contains(&capability)
        }

        fn is_available(&self) -> bool {
            self.available
        }
    }

    fn isolated() -> Declared {
        Declared {
            kind: BackendKind::Isolated,
            modules: false,
            capabilities: &[],
            available: true,
        }
    }

    fn fallback(available: bool) -> Declared {
        Declared {
            kind: BackendKind::Subprocess,
            modules: true,
            capabilities: &[HostCapability::Modules, HostCapability::Timers, HostCapability::Network],
            available,
        }
    }

    fn required(capabilities: &[HostCapability]) -> BTreeSet<HostCapability> {
        capabilities.iter().copied().collect()
    }

    #[test]
    fn test_plain_script_runs_isolated() {
        let selection = choose_backend(
            &ExecutionSettings::default(),
            &required(&[]),
            &isolated(),
            &fallback(true),
        );
        assert_eq!(selection.backend, BackendKind::Isolated);
    }

    #[test]
    fn test_modules_and_overrides_force_fallback() {
        let settings = ExecutionSettings::default();
        let modules = required(&[HostCapability::Modules]);
        assert_eq!(
            choose_backend(&settings, &modules, &isolated(), &fallback(true)).reason,
            "module loading"
        );

        let forced = ExecutionSettings {
            force_subprocess: true,
            ..ExecutionSettings::default()
        };
        assert_eq!(
            choose_backend(&forced, &required(&[]), &isolated(), &fallback(true)).reason,
            "forced"
        );

        let not_preferred = ExecutionSettings {
            prefer_isolated: false,
            ..ExecutionSettings::default()
        };
        assert_eq!(
            choose_backend(&not_preferred, &required(&[]), &isolated(), &fallback(true)).backend,
            BackendKind::Subprocess
        );

        let mut unavailable = isolated();
        unavailable.available = false;
        assert_eq!(
            choose_backend(&settings, &required(&[]), &unavailable, &fallback(true)).reason,
            "isolated unavailable"
        );
    }

    #[test]
    fn test_host_capabilities() {
        let settings = ExecutionSettings::default();

        let timers = required(&[HostCapability::Timers]);
        assert_eq!(
            choose_backend(&settings, &timers, &isolated(), &fallback(true)).reason,
            "host capability"
        );
        // Nobody to hand it to: the isolated stubs explain what is missing
        assert_eq!(
            choose_backend(&settings, &timers, &isolated(), &fallback(false)).backend,
            BackendKind::Isolated
        );

        let audio = required(&[HostCapability::Audio]);
        assert_eq!(
            choose_backend(&settings, &audio, &isolated(), &fallback(true)).backend,
            BackendKind::Isolated
        );
    }

    #[test]
    fn test_modules_without_fallback_still_choose_fallback() {
        let modules = required(&[HostCapability::Modules]);
        let selection = choose_backend(&ExecutionSettings::default(), &modules, &isolated(), &fallback(false));
        assert_eq!(selection.backend, BackendKind::Subprocess);
    }
}
