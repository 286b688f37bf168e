//! Patch applicator - runs the guard over every patch in a config
//!
//! This module provides the batch layer used by the CLI:
//! - Resolves each patch to a target file and backup location
//! - Recovers stale backups before patching
//! - Applies, restores or inspects each target
//! - Reports one result per patch, in config order

use crate::config::locate::{LocateError, TargetLocator};
use crate::config::schema::PatchConfig;
use crate::guard::{ApplyOutcome, GuardError, GuardStatus, PatchGuard, RestoreOutcome};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One entry per patch id, in config order.
pub type PatchResults<T> = Vec<(String, Result<T, ApplicationError>)>;

/// Result of patching a single target
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchResult should be checked for success/failure"]
pub struct PatchResult {
    pub file: PathBuf,
    pub backup: PathBuf,
    /// A backup left by a crashed run was restored first
    pub recovered: bool,
    pub outcome: ApplyOutcome,
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            ApplyOutcome::Applied { replacements } => write!(
                f,
                "Applied to {} ({} replacement{})",
                self.file.display(),
                replacements,
                if replacements == 1 { "" } else { "s" }
            ),
            ApplyOutcome::AlreadyApplied => {
                write!(f, "Already applied to {}", self.file.display())
            }
            ApplyOutcome::PatternMissing => {
                write!(f, "Search text not found in {}", self.file.display())
            }
        }
    }
}

/// Result of restoring a single target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreResult {
    pub file: PathBuf,
    pub outcome: RestoreOutcome,
}

/// Errors during patch application
#[derive(Debug)]
pub enum ApplicationError {
    /// Target file could not be located
    Locate(LocateError),
    /// Backup, patch or restore failed
    Guard(GuardError),
    /// Search text absent in strict mode
    PatternMissing { file: PathBuf },
    /// Target could not be inspected
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::Locate(e) => write!(f, "{}", e),
            ApplicationError::Guard(e) => write!(f, "{}", e),
            ApplicationError::PatternMissing { file } => write!(
                f,
                "search text not found in {} and replacement absent",
                file.display()
            ),
            ApplicationError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplicationError::Locate(e) => Some(e),
            ApplicationError::Guard(e) => Some(e),
            ApplicationError::Io { source, .. } => Some(source),
            ApplicationError::PatternMissing { .. } => None,
        }
    }
}

impl From<LocateError> for ApplicationError {
    fn from(e: LocateError) -> Self {
        ApplicationError::Locate(e)
    }
}

impl From<GuardError> for ApplicationError {
    fn from(e: GuardError) -> Self {
        ApplicationError::Guard(e)
    }
}

/// Resolve every patch of `config` to a guard.
///
/// A patch whose resolved target or backup is already used by an earlier
/// patch fails with [`LocateError::SharedPath`]: two guards on one path
/// would share a backup and restore each other's work.
pub fn guards_for(
    config: &PatchConfig,
    locator: &TargetLocator,
) -> PatchResults<PatchGuard> {
    let mut claimed: HashMap<PathBuf, &str> = HashMap::new();
    config
        .patches
        .iter()
        .map(|patch| {
            let guard = locator
                .guard_for(config, patch)
                .and_then(|guard| claim_paths(&mut claimed, &patch.id, guard));
            (patch.id.clone(), guard.map_err(Into::into))
        })
        .collect()
}

fn claim_paths<'a>(
    claimed: &mut HashMap<PathBuf, &'a str>,
    patch_id: &'a str,
    guard: PatchGuard,
) -> Result<PatchGuard, LocateError> {
    let shared = |path: &Path, other_id: &str| LocateError::SharedPath {
        patch_id: patch_id.to_string(),
        other_id: other_id.to_string(),
        path: path.to_path_buf(),
    };

    for path in [guard.original(), guard.backup()] {
        if let Some(other_id) = claimed.get(path) {
            return Err(shared(path, *other_id));
        }
    }
    if guard.original() == guard.backup() {
        return Err(shared(guard.original(), patch_id));
    }

    claimed.insert(guard.original().to_path_buf(), patch_id);
    claimed.insert(guard.backup().to_path_buf(), patch_id);
    Ok(guard)
}

/// Recover, back up and patch every target.
///
/// With `strict`, a missing search text is an error and that target is
/// restored immediately so it is left clean.
pub fn apply_patches(
    config: &PatchConfig,
    locator: &TargetLocator,
    strict: bool,
) -> PatchResults<PatchResult> {
    for_each_guard(config, locator, |guard| apply_one(guard, strict))
}

/// Restore every target from its backup.
pub fn restore_patches(
    config: &PatchConfig,
    locator: &TargetLocator,
) -> PatchResults<RestoreResult> {
    for_each_guard(config, locator, |guard| {
        let outcome = guard.restore()?;
        Ok(RestoreResult {
            file: guard.original().to_path_buf(),
            outcome,
        })
    })
}

/// Restore stale backups only. `true` means a backup was found.
pub fn recover_patches(config: &PatchConfig, locator: &TargetLocator) -> PatchResults<bool> {
    for_each_guard(config, locator, |guard| Ok(guard.ensure_clean()?))
}

/// Inspect every target without modifying anything.
pub fn patch_status(config: &PatchConfig, locator: &TargetLocator) -> PatchResults<GuardStatus> {
    for_each_guard(config, locator, |guard| {
        guard.status().map_err(|source| ApplicationError::Io {
            path: guard.original().to_path_buf(),
            source,
        })
    })
}

fn apply_one(guard: &PatchGuard, strict: bool) -> Result<PatchResult, ApplicationError> {
    let recovered = guard.ensure_clean()?;
    let outcome = guard.apply()?;

    if strict && outcome == ApplyOutcome::PatternMissing {
        let _ = guard.restore()?;
        return Err(ApplicationError::PatternMissing {
            file: guard.original().to_path_buf(),
        });
    }

    Ok(PatchResult {
        file: guard.original().to_path_buf(),
        backup: guard.backup().to_path_buf(),
        recovered,
        outcome,
    })
}

fn for_each_guard<T>(
    config: &PatchConfig,
    locator: &TargetLocator,
    mut op: impl FnMut(&PatchGuard) -> Result<T, ApplicationError>,
) -> PatchResults<T> {
    guards_for(config, locator)
        .into_iter()
        .map(|(id, guard)| {
            debug!(patch = %id, "processing patch");
            let result = guard.and_then(|guard| op(&guard));
            (id, result)
        })
        .collect()
}
