//! Resolve patch definitions to concrete files on disk.
//!
//! Vendor files usually live inside an installed PlatformIO package, not
//! in the project; a patch naming a `package` is looked up there.

use crate::config::schema::{PatchConfig, PatchDefinition};
use crate::fsio::{backup_path_for, normalize_lexically};
use crate::guard::PatchGuard;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Overrides the packages directory outright.
pub const PACKAGES_DIR_ENV: &str = "PLATFORMIO_PACKAGES_DIR";
/// PlatformIO core directory; packages live in its `packages/` subdirectory.
pub const CORE_DIR_ENV: &str = "PLATFORMIO_CORE_DIR";

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("patch '{patch_id}' needs package '{package}' but no PlatformIO packages directory could be determined (set PLATFORMIO_PACKAGES_DIR)")]
    NoPackagesDir { patch_id: String, package: String },

    #[error("patch '{patch_id}': package '{package}' is not installed in {packages_dir}")]
    PackageNotInstalled {
        patch_id: String,
        package: String,
        packages_dir: PathBuf,
    },

    #[error("patch '{patch_id}' uses {path}, which patch '{other_id}' already patches or backs up")]
    SharedPath {
        patch_id: String,
        other_id: String,
        path: PathBuf,
    },
}

/// Default PlatformIO packages directory.
///
/// Priority order:
/// 1. `PLATFORMIO_PACKAGES_DIR`
/// 2. `$PLATFORMIO_CORE_DIR/packages`
/// 3. `~/.platformio/packages`
pub fn platformio_packages_dir() -> Option<PathBuf> {
    if let Some(dir) = env::var_os(PACKAGES_DIR_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    if let Some(dir) = env::var_os(CORE_DIR_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir).join("packages"));
    }
    home::home_dir().map(|home| home.join(".platformio").join("packages"))
}

/// Turns [`PatchDefinition`]s into [`PatchGuard`]s.
#[derive(Debug, Clone)]
pub struct TargetLocator {
    workspace_root: PathBuf,
    packages_dir: Option<PathBuf>,
}

impl TargetLocator {
    /// Locator for `workspace_root`, with the packages directory taken
    /// from the environment.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            packages_dir: platformio_packages_dir(),
        }
    }

    pub fn with_packages_dir(mut self, packages_dir: impl Into<PathBuf>) -> Self {
        self.packages_dir = Some(packages_dir.into());
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn packages_dir(&self) -> Option<&Path> {
        self.packages_dir.as_deref()
    }

    /// Absolute path of the file a patch edits.
    pub fn target_path(&self, patch: &PatchDefinition) -> Result<PathBuf, LocateError> {
        let Some(package) = &patch.package else {
            return Ok(self.relative_to_workspace(&patch.file));
        };

        let packages_dir = self
            .packages_dir
            .as_ref()
            .ok_or_else(|| LocateError::NoPackagesDir {
                patch_id: patch.id.clone(),
                package: package.clone(),
            })?;

        let package_dir = packages_dir.join(package);
        if !package_dir.is_dir() {
            return Err(LocateError::PackageNotInstalled {
                patch_id: patch.id.clone(),
                package: package.clone(),
                packages_dir: packages_dir.clone(),
            });
        }

        Ok(package_dir.join(&patch.file))
    }

    /// Build the guard for one patch of `config`.
    ///
    /// Both paths are normalized lexically, so different spellings of one
    /// file compare equal.
    pub fn guard_for(
        &self,
        config: &PatchConfig,
        patch: &PatchDefinition,
    ) -> Result<PatchGuard, LocateError> {
        let original = normalize_lexically(&self.target_path(patch)?);
        let backup = match &patch.backup {
            Some(backup) => normalize_lexically(&self.relative_to_workspace(backup)),
            None => backup_path_for(&original, config.backup_suffix()),
        };
        Ok(PatchGuard::new(original, patch.rule()).with_backup(backup))
    }

    fn relative_to_workspace(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}
