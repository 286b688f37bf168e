//! Patch Guard: crash-safe patch-and-restore for vendor files
//!
//! Some builds need a file they do not own patched for the duration of one
//! build step, e.g. a framework header in an installed PlatformIO package.
//! This crate backs the file up, applies a literal text substitution, and
//! guarantees the original comes back afterwards.
//!
//! # Architecture
//!
//! The in-flight state of a target is the presence of its backup file and
//! nothing else. [`ensure_clean`] repairs whatever a crashed run left,
//! [`apply`] backs up and patches, [`restore`] puts the original back.
//! [`PatchGuard::engage`] bundles the first two into a [`ScopedPatch`]
//! that restores on drop.
//!
//! # Safety
//!
//! - No patch without a backup
//! - Atomic file writes (tempfile + fsync + rename)
//! - A failed patch restores immediately
//! - Idempotent apply and restore
//!
//! # Example
//!
//! ```no_run
//! use patch_guard::{PatchGuard, PatchRule};
//!
//! let guard = PatchGuard::new(
//!     "/home/me/.platformio/packages/framework-arduinoteensy/cores/teensy4/usb_desc.h",
//!     PatchRule::new(
//!         "#define MOUSE_INTERVAL        2",
//!         "#define MOUSE_INTERVAL        1",
//!     ),
//! );
//!
//! let scoped = guard.engage()?;
//! // ... build against the patched header ...
//! scoped.release()?;
//! # Ok::<(), patch_guard::GuardError>(())
//! ```

pub mod config;
pub mod fsio;
pub mod guard;
pub mod rule;
pub mod scope;

// Re-exports
pub use config::{
    apply_patches, load_from_path, load_from_str, patch_status, restore_patches,
    ApplicationError, ConfigError, PatchConfig, PatchResult, TargetLocator,
};
pub use guard::{
    apply, ensure_clean, restore, ApplyOutcome, GuardError, GuardState, GuardStatus, PatchGuard,
    RestoreOutcome,
};
pub use rule::{PatchRule, Substitution};
pub use scope::{run_guarded, ScopeError, ScopedPatch};
