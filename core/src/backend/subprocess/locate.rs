//! Locating the JavaScript runtime binary.

use std::path::{Path, PathBuf};

use crate::config::NODE_PATH_ENV;

/// First existing candidate: `SCRATCHPAD_NODE_PATH`, the configured path,
/// then `node` on `PATH`.
pub fn resolve_runtime(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(NODE_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(path) = configured.filter(|path| path.exists()) {
        return Some(path.to_path_buf());
    }

    which::which("node").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_path_must_exist() {
        let file = tempfile::NamedTempFile::new().unwrap();
        if std::env::var_os(NODE_PATH_ENV).is_none() {
            assert_eq!(resolve_runtime(Some(file.path())), Some(file.path().to_path_buf()));
        }

        let missing = Path::new("/definitely/not/a/runtime");
        assert_ne!(resolve_runtime(Some(missing)).as_deref(), Some(missing));
    }
}
