pub mod applicator;
pub mod loader;
pub mod locate;
pub mod schema;

pub use applicator::{
    apply_patches, guards_for, patch_status, recover_patches, restore_patches, ApplicationError,
    PatchResult, PatchResults, RestoreResult,
};
pub use loader::{discover, load_from_path, load_from_str, ConfigError, CONFIG_FILE_NAME};
pub use locate::{platformio_packages_dir, LocateError, TargetLocator};
pub use schema::{Metadata, PatchConfig, PatchDefinition, ValidationError, ValidationIssue};
