//! Host capabilities a script reaches for.
//!
//! Backends declare which of these they provide; the coordinator compares
//! that against what the script references before choosing one.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use super::modules::uses_modules;
use super::scanner::SourceMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostCapability {
    Modules,
    Timers,
    Network,
    Process,
    Buffer,
    Audio,
}

impl HostCapability {
    pub const ALL: [HostCapability; 6] = [
        HostCapability::Modules,
        HostCapability::Timers,
        HostCapability::Network,
        HostCapability::Process,
        HostCapability::Buffer,
        HostCapability::Audio,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HostCapability::Modules => "modules",
            HostCapability::Timers => "timers",
            HostCapability::Network => "network",
            HostCapability::Process => "process",
            HostCapability::Buffer => "buffer",
            HostCapability::Audio => "audio",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|capability| capability.name() == name)
    }

    /// Global bindings that provide this capability.
    pub fn globals(self) -> &'static [&'static str] {
        match self {
            HostCapability::Modules => &["require"],
            HostCapability::Timers => &[
                "setTimeout",
                "setInterval",
                "setImmediate",
                "clearTimeout",
                "clearInterval",
            ],
            HostCapability::Network => &["fetch"],
            HostCapability::Process => &["process"],
            HostCapability::Buffer => &["Buffer"],
            HostCapability::Audio => &["AudioContext", "OfflineAudioContext"],
        }
    }

    fn for_global(global: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|capability| capability.globals().contains(&global))
    }
}

impl fmt::Display for HostCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn global_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let globals: Vec<&str> = HostCapability::ALL
            .iter()
            .filter(|capability| **capability != HostCapability::Modules)
            .flat_map(|capability| capability.globals().iter().copied())
            .collect();
        Regex::new(&format!(r"\b({})\b", globals.join("|")))
            .unwrap_or_else(|e| panic!("invalid capability pattern: {e}"))
    })
}

/// Capabilities referenced from code (strings and comments ignored).
pub fn required_capabilities(source: &str) -> BTreeSet<HostCapability> {
    let mask = SourceMask::scan(source);
    let bytes = source.as_bytes();

    let mut required: BTreeSet<HostCapability> = global_pattern()
        .find_iter(source)
        .filter(|found| {
            // `obj.fetch` is a property, not the global
            let is_property = found.start() > 0 && bytes[found.start() - 1] == b'.';
            mask.is_code(found.start()) && !is_property
        })
        .filter_map(|found| HostCapability::for_global(found.as_str()))
        .collect();

    if uses_modules(source) {
        required.insert(HostCapability::Modules);
    }
    required
}
