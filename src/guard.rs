//! The patch-and-restore guard.
//!
//! Whether a patch is in flight is never stored anywhere: it is the
//! presence of the backup file. That keeps the guard's state consistent
//! across crashes, since the next run sees exactly what the last one left.

use crate::fsio::{atomic_write, backup_path_for, fingerprint, replace_with_copy, touch};
use crate::rule::{PatchRule, Substitution};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Suffix used when no explicit backup path is given.
pub const DEFAULT_BACKUP_SUFFIX: &str = ".bak";

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("could not back up {original} to {backup}: {source}")]
    BackupFailed {
        original: PathBuf,
        backup: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not patch {path}: {source}{}", compensation_note(.restore_error))]
    PatchFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
        /// Set when the compensating restore failed as well
        restore_error: Option<Box<GuardError>>,
    },

    #[error("could not restore {original} from {backup}: {source}")]
    RestoreFailed {
        original: PathBuf,
        backup: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn compensation_note(restore_error: &Option<Box<GuardError>>) -> String {
    match restore_error {
        Some(e) => format!(" (restore also failed: {e})"),
        None => String::new(),
    }
}

/// Filesystem-derived state of one guarded target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    /// No backup exists
    Clean,
    /// Backup exists and matches the original byte for byte
    BackedUp,
    /// Backup exists and the original differs from it
    Patched,
}

impl fmt::Display for GuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardState::Clean => write!(f, "clean"),
            GuardState::BackedUp => write!(f, "backed up"),
            GuardState::Patched => write!(f, "patched"),
        }
    }
}

/// Result of [`apply`].
///
/// In every variant a backup exists afterwards, so [`restore`] is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
#[must_use = "ApplyOutcome tells whether the file was actually changed"]
pub enum ApplyOutcome {
    /// The file was rewritten
    Applied { replacements: usize },
    /// Match text absent, replacement text present
    AlreadyApplied,
    /// Neither text present; the file was left untouched
    PatternMissing,
}

impl ApplyOutcome {
    pub fn changed_file(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// Result of [`restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreOutcome {
    Restored,
    /// No backup was present; logged as a warning, never an error
    NothingToRestore,
}

/// Snapshot of a target for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardStatus {
    pub original: PathBuf,
    pub backup: PathBuf,
    pub state: GuardState,
    /// xxh3 of the original, hex; `None` if it does not exist
    pub original_hash: Option<String>,
    /// xxh3 of the backup, hex; `None` if it does not exist
    pub backup_hash: Option<String>,
}

/// Put a target back into the `Clean` state after a crashed run.
///
/// Returns `true` if a stale backup was found and restored.
pub fn ensure_clean(original: &Path, backup: &Path) -> Result<bool, GuardError> {
    if !backup.exists() {
        debug!(backup = %backup.display(), "no stale backup");
        return Ok(false);
    }

    info!(
        original = %original.display(),
        backup = %backup.display(),
        "found stale backup from a previous run, restoring original before patching"
    );
    restore_from_backup(original, backup)?;
    Ok(true)
}

/// Back up `original`, then apply `rule` to it.
///
/// Expects [`ensure_clean`] to have run. If a backup is nevertheless
/// present it is kept as is: it already holds the pristine content and
/// overwriting it with a possibly patched file would lose that.
pub fn apply(original: &Path, backup: &Path, rule: &PatchRule) -> Result<ApplyOutcome, GuardError> {
    if backup.exists() {
        debug!(backup = %backup.display(), "backup already present, keeping it");
    } else {
        create_backup(original, backup)?;
        info!(
            original = %original.display(),
            backup = %backup.display(),
            "created backup"
        );
    }

    match patch_in_place(original, rule) {
        Ok(outcome) => Ok(outcome),
        Err(source) => {
            warn!(
                original = %original.display(),
                error = %source,
                "patch failed, restoring from backup"
            );
            let restore_error = restore_from_backup(original, backup).err().map(Box::new);
            Err(GuardError::PatchFailed {
                path: original.to_path_buf(),
                source,
                restore_error,
            })
        }
    }
}

/// Copy the backup over `original` and delete it.
///
/// Safe to call at any time: without a backup this only warns.
pub fn restore(original: &Path, backup: &Path) -> Result<RestoreOutcome, GuardError> {
    if !backup.exists() {
        warn!(
            original = %original.display(),
            backup = %backup.display(),
            "backup file not found, nothing to restore"
        );
        return Ok(RestoreOutcome::NothingToRestore);
    }

    restore_from_backup(original, backup)?;
    info!(original = %original.display(), "original file restored");
    Ok(RestoreOutcome::Restored)
}

/// Derive the [`GuardState`] of a target from the filesystem.
pub fn state(original: &Path, backup: &Path) -> io::Result<GuardState> {
    status(original, backup).map(|s| s.state)
}

/// Inspect a target without modifying anything.
pub fn status(original: &Path, backup: &Path) -> io::Result<GuardStatus> {
    let original_hash = optional_fingerprint(original)?;
    let backup_hash = optional_fingerprint(backup)?;

    let state = match (&backup_hash, &original_hash) {
        (None, _) => GuardState::Clean,
        (Some(b), Some(o)) if b == o => GuardState::BackedUp,
        (Some(_), _) => GuardState::Patched,
    };

    Ok(GuardStatus {
        original: original.to_path_buf(),
        backup: backup.to_path_buf(),
        state,
        original_hash: original_hash.map(|h| format!("{h:016x}")),
        backup_hash: backup_hash.map(|h| format!("{h:016x}")),
    })
}

fn optional_fingerprint(path: &Path) -> io::Result<Option<u64>> {
    match fingerprint(path) {
        Ok(hash) => Ok(Some(hash)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn create_backup(original: &Path, backup: &Path) -> Result<(), GuardError> {
    // Written atomically: a torn backup would be restored as "pristine" later.
    fs::read(original)
        .and_then(|content| {
            if let Some(parent) = backup.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            atomic_write(backup, &content)
        })
        .map_err(|source| GuardError::BackupFailed {
            original: original.to_path_buf(),
            backup: backup.to_path_buf(),
            source,
        })
}

fn patch_in_place(original: &Path, rule: &PatchRule) -> io::Result<ApplyOutcome> {
    // The rename in atomic_write would silently bypass a read-only flag.
    if fs::metadata(original)?.permissions().readonly() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "target is read-only",
        ));
    }
    let content = fs::read_to_string(original)?;

    match rule.substitute(&content) {
        Substitution::Replaced { content, count } => {
            atomic_write(original, content.as_bytes())?;
            touch(original)?;
            info!(
                original = %original.display(),
                replacements = count,
                "patched file"
            );
            Ok(ApplyOutcome::Applied {
                replacements: count,
            })
        }
        Substitution::AlreadyApplied => {
            info!(original = %original.display(), "already patched, skipping");
            Ok(ApplyOutcome::AlreadyApplied)
        }
        Substitution::Missing => {
            warn!(
                original = %original.display(),
                search = %rule.match_text,
                "search text not found and replacement absent; file left unchanged (upstream format changed?)"
            );
            Ok(ApplyOutcome::PatternMissing)
        }
    }
}

fn restore_from_backup(original: &Path, backup: &Path) -> Result<(), GuardError> {
    let err = |source: io::Error| GuardError::RestoreFailed {
        original: original.to_path_buf(),
        backup: backup.to_path_buf(),
        source,
    };
    replace_with_copy(backup, original).map_err(err)?;
    fs::remove_file(backup).map_err(err)
}

/// One guarded target: a file, its backup location, and the rule to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchGuard {
    original: PathBuf,
    backup: PathBuf,
    rule: PatchRule,
}

impl PatchGuard {
    /// Guard `original` with the default `.bak` backup next to it.
    pub fn new(original: impl Into<PathBuf>, rule: PatchRule) -> Self {
        let original = original.into();
        let backup = backup_path_for(&original, DEFAULT_BACKUP_SUFFIX);
        Self {
            original,
            backup,
            rule,
        }
    }

    /// Override the backup location.
    pub fn with_backup(mut self, backup: impl Into<PathBuf>) -> Self {
        self.backup = backup.into();
        self
    }

    pub fn original(&self) -> &Path {
        &self.original
    }

    pub fn backup(&self) -> &Path {
        &self.backup
    }

    pub fn rule(&self) -> &PatchRule {
        &self.rule
    }

    pub fn ensure_clean(&self) -> Result<bool, GuardError> {
        ensure_clean(&self.original, &self.backup)
    }

    pub fn apply(&self) -> Result<ApplyOutcome, GuardError> {
        apply(&self.original, &self.backup, &self.rule)
    }

    pub fn restore(&self) -> Result<RestoreOutcome, GuardError> {
        restore(&self.original, &self.backup)
    }

    pub fn state(&self) -> io::Result<GuardState> {
        state(&self.original, &self.backup)
    }

    pub fn status(&self) -> io::Result<GuardStatus> {
        status(&self.original, &self.backup)
    }
}
