//! Integration tests for the patch config
//!
//! Tests parsing, validation, target resolution and batch application

use patch_guard::config::{
    apply_patches, load_from_path, load_from_str, patch_status, restore_patches, ConfigError,
    TargetLocator, ValidationIssue,
};
use patch_guard::{ApplyOutcome, GuardState, RestoreOutcome};
use std::fs;
use tempfile::TempDir;

const TEENSY_CONFIG: &str = r##"
[meta]
name = "teensy41-8khz"
description = "1 ms USB mouse polling"

[[patches]]
id = "mouse-interval"
package = "framework-arduinoteensy"
file = "cores/teensy4/usb_desc.h"
search = "#define MOUSE_INTERVAL        2"
replace = "#define MOUSE_INTERVAL        1"
"##;

/// Helper to create a fake PlatformIO packages dir with the Teensy core
fn setup_packages() -> TempDir {
    let dir = TempDir::new().unwrap();
    let core = dir.path().join("framework-arduinoteensy/cores/teensy4");
    fs::create_dir_all(&core).unwrap();
    fs::write(
        core.join("usb_desc.h"),
        "  #define MOUSE_SIZE            8\n  #define MOUSE_INTERVAL        2\n",
    )
    .unwrap();
    dir
}

fn validation_issues(input: &str) -> Vec<ValidationIssue> {
    match load_from_str(input) {
        Err(ConfigError::Validation { source, .. }) => source.issues,
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_load_patch_config_basic() {
    let config = load_from_str(TEENSY_CONFIG).expect("Failed to parse config");

    assert_eq!(config.meta.name, "teensy41-8khz");
    assert_eq!(config.backup_suffix(), ".bak");
    assert_eq!(config.patches.len(), 1);
    let patch = &config.patches[0];
    assert_eq!(patch.id, "mouse-interval");
    assert_eq!(patch.package.as_deref(), Some("framework-arduinoteensy"));
    assert_eq!(patch.rule().match_text, "#define MOUSE_INTERVAL        2");
}

#[test]
fn test_empty_config_rejected() {
    let issues = validation_issues("[meta]\nname = \"empty\"\n");
    assert!(matches!(issues[..], [ValidationIssue::EmptyPatchList]));
}

#[test]
fn test_non_idempotent_rule_rejected() {
    let issues = validation_issues(
        r##"
[[patches]]
id = "grow"
file = "a.h"
search = "INTERVAL"
replace = "INTERVAL_FAST INTERVAL"
"##,
    );
    assert!(matches!(issues[..], [ValidationIssue::InvalidCombo { .. }]));
}

#[test]
fn test_shared_target_and_duplicate_id_rejected() {
    let issues = validation_issues(
        r##"
[[patches]]
id = "one"
file = "a.h"
search = "A 2"
replace = "A 1"

[[patches]]
id = "one"
file = "a.h"
search = "B 2"
replace = "B 1"
"##,
    );
    assert_eq!(issues.len(), 2);
    assert!(issues
        .iter()
        .any(|i| matches!(i, ValidationIssue::DuplicateId { .. })));
    assert!(issues
        .iter()
        .any(|i| matches!(i, ValidationIssue::SharedTarget { .. })));
}

#[test]
fn test_empty_search_rejected() {
    let issues = validation_issues(
        r##"
[[patches]]
id = "blank"
file = "a.h"
search = ""
replace = "x"
"##,
    );
    assert!(matches!(
        issues[..],
        [ValidationIssue::MissingField {
            field: "search",
            ..
        }]
    ));
}

#[test]
fn test_load_from_path_reports_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("patch-guard.toml");
    fs::write(&path, "[[patches]]\nid = \"\"\nfile = \"a.h\"\nsearch = \"a\"\nreplace = \"b\"\n")
        .unwrap();

    let err = load_from_path(&path).unwrap_err();

    assert!(matches!(err, ConfigError::Validation { path: Some(_), .. }));
    assert!(err.to_string().contains("missing required field 'id'"));
}

#[test]
fn test_package_patch_lifecycle() {
    let packages = setup_packages();
    let workspace = TempDir::new().unwrap();
    let config = load_from_str(TEENSY_CONFIG).unwrap();
    let locator = TargetLocator::new(workspace.path()).with_packages_dir(packages.path());
    let header = packages
        .path()
        .join("framework-arduinoteensy/cores/teensy4/usb_desc.h");
    let pristine = fs::read_to_string(&header).unwrap();

    let applied = apply_patches(&config, &locator, true);
    let result = applied[0].1.as_ref().unwrap();
    assert_eq!(result.file, header);
    assert_eq!(result.outcome, ApplyOutcome::Applied { replacements: 1 });
    assert!(fs::read_to_string(&header)
        .unwrap()
        .contains("MOUSE_INTERVAL        1"));

    let status = patch_status(&config, &locator);
    assert_eq!(status[0].1.as_ref().unwrap().state, GuardState::Patched);

    let restored = restore_patches(&config, &locator);
    assert_eq!(
        restored[0].1.as_ref().unwrap().outcome,
        RestoreOutcome::Restored
    );
    assert_eq!(fs::read_to_string(&header).unwrap(), pristine);
    assert!(!header.with_file_name("usb_desc.h.bak").exists());
}

#[test]
fn test_missing_package_reported_per_patch() {
    let packages = TempDir::new().unwrap();
    let config = load_from_str(TEENSY_CONFIG).unwrap();
    let locator = TargetLocator::new(packages.path()).with_packages_dir(packages.path());

    let results = apply_patches(&config, &locator, false);

    assert_eq!(results.len(), 1);
    let err = results[0].1.as_ref().unwrap_err();
    assert!(err.to_string().contains("framework-arduinoteensy"));
}
