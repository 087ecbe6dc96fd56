//! `ctlutils::path` is a module containing path utilities for the corectl project.

use std::{
    env,
    path::{Path, PathBuf},
};

use crate::{CtlutilsError, CtlutilsResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Resolves an executable, honouring an environment variable override.
///
/// If `env_var` is set, its value is used as the path and must exist. Otherwise `default` is
/// used: a value containing a path separator is taken as is, a bare name is searched for on
/// `PATH`.
pub fn resolve_env_path(env_var: &str, default: impl AsRef<Path>) -> CtlutilsResult<PathBuf> {
    if let Ok(value) = env::var(env_var) {
        let path = PathBuf::from(&value);
        if path.exists() {
            return Ok(path);
        }
        return Err(CtlutilsError::BinaryNotFound(
            value,
            format!("environment variable {env_var}"),
        ));
    }

    let default = default.as_ref();
    if default.components().count() > 1 {
        if default.exists() {
            return Ok(default.to_path_buf());
        }
        return Err(CtlutilsError::BinaryNotFound(
            default.display().to_string(),
            "default path".to_string(),
        ));
    }

    which::which(default)
        .map_err(|e| CtlutilsError::BinaryNotFound(default.display().to_string(), e.to_string()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_env_path_prefers_override() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let exe = dir.path().join("fake-hypervisor");
        std::fs::write(&exe, "")?;

        env::set_var("CTLUTILS_TEST_OVERRIDE_EXE", &exe);
        let resolved = resolve_env_path("CTLUTILS_TEST_OVERRIDE_EXE", "sh")?;
        env::remove_var("CTLUTILS_TEST_OVERRIDE_EXE");

        assert_eq!(resolved, exe);
        Ok(())
    }

    #[test]
    fn test_resolve_env_path_rejects_missing_override() {
        env::set_var("CTLUTILS_TEST_MISSING_EXE", "/nonexistent/hypervisor");
        let result = resolve_env_path("CTLUTILS_TEST_MISSING_EXE", "sh");
        env::remove_var("CTLUTILS_TEST_MISSING_EXE");

        assert!(matches!(result, Err(CtlutilsError::BinaryNotFound(..))));
    }

    #[test]
    fn test_resolve_env_path_searches_path() -> anyhow::Result<()> {
        let resolved = resolve_env_path("CTLUTILS_TEST_UNSET_EXE", "sh")?;
        assert!(resolved.ends_with("sh"));

        assert!(matches!(
            resolve_env_path("CTLUTILS_TEST_UNSET_EXE", "definitely-not-installed-binary"),
            Err(CtlutilsError::BinaryNotFound(..))
        ));
        Ok(())
    }
}
