//! Scoped acquisition of a patch: engage before a build step, restore on
//! every exit path.

use crate::guard::{ApplyOutcome, GuardError, PatchGuard, RestoreOutcome};
use tracing::error;

/// A patch that is in flight. Dropping it restores the original file.
#[derive(Debug)]
#[must_use = "dropping a ScopedPatch immediately restores the file"]
pub struct ScopedPatch<'a> {
    guard: &'a PatchGuard,
    outcome: ApplyOutcome,
    recovered: bool,
    released: bool,
}

impl PatchGuard {
    /// Recover from any crashed run, then apply the patch.
    ///
    /// The returned [`ScopedPatch`] restores the file when it goes out of
    /// scope, including during panic unwinding.
    pub fn engage(&self) -> Result<ScopedPatch<'_>, GuardError> {
        let recovered = self.ensure_clean()?;
        let outcome = self.apply()?;
        Ok(ScopedPatch {
            guard: self,
            outcome,
            recovered,
            released: false,
        })
    }
}

impl<'a> ScopedPatch<'a> {
    pub fn outcome(&self) -> ApplyOutcome {
        self.outcome
    }

    /// A backup left by a crashed run was restored before patching.
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    pub fn guard(&self) -> &'a PatchGuard {
        self.guard
    }

    /// Restore now and report the result instead of logging it from `Drop`.
    pub fn release(mut self) -> Result<RestoreOutcome, GuardError> {
        self.released = true;
        self.guard.restore()
    }
}

impl Drop for ScopedPatch<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.guard.restore() {
            error!(original = %self.guard.original().display(), error = %e, "restore on drop failed");
        }
    }
}

/// Errors from [`run_guarded`].
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("failed to engage patch for {}: {source}", .original.display())]
    Engage {
        original: std::path::PathBuf,
        #[source]
        source: GuardError,
    },

    #[error("{} restore(s) failed after the guarded step", .0.len())]
    Release(Vec<GuardError>),
}

/// Engage every guard, run `step`, then restore in reverse order.
///
/// If engaging a later guard fails, the earlier ones are restored before
/// the error is returned and `step` never runs. Every guard is restored
/// after `step`; any restore failure replaces `step`'s value with
/// [`ScopeError::Release`].
pub fn run_guarded<'g, T>(
    guards: &'g [PatchGuard],
    step: impl FnOnce(&[ScopedPatch<'g>]) -> T,
) -> Result<T, ScopeError> {
    let mut engaged = Vec::with_capacity(guards.len());

    for guard in guards {
        match guard.engage() {
            Ok(scoped) => engaged.push(scoped),
            Err(source) => {
                // Earlier patches restore on drop, newest first
                while let Some(scoped) = engaged.pop() {
                    drop(scoped);
                }
                return Err(ScopeError::Engage {
                    original: guard.original().to_path_buf(),
                    source,
                });
            }
        }
    }

    let value = step(&engaged);

    let mut failures = Vec::new();
    while let Some(scoped) = engaged.pop() {
        if let Err(e) = scoped.release() {
            failures.push(e);
        }
    }

    if failures.is_empty() {
        Ok(value)
    } else {
        Err(ScopeError::Release(failures))
    }
}
