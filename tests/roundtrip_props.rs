//! Property tests: apply followed by restore always gives back the exact
//! original bytes, whatever the content and rule.

use patch_guard::{apply, restore, ApplyOutcome, PatchRule};
use proptest::prelude::*;
use std::fs;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn apply_then_restore_round_trips(
        prefix in "[ -~\n\t]{0,200}",
        suffix in "[ -~\n\t]{0,200}",
        search in "[A-Za-z_ #]{1,24}[0-9]",
        replace in "[A-Za-z_ #]{0,24}",
    ) {
        let content = format!("{prefix}{search}{suffix}");
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("usb_desc.h");
        let backup = dir.path().join("usb_desc.h.bak");
        fs::write(&original, &content).unwrap();

        let outcome = apply(&original, &backup, &PatchRule::new(search, replace)).unwrap();
        let applied = matches!(outcome, ApplyOutcome::Applied { replacements } if replacements >= 1);
        prop_assert!(applied, "expected a replacement, got {:?}", outcome);
        prop_assert!(backup.exists());

        let _ = restore(&original, &backup).unwrap();
        prop_assert_eq!(fs::read_to_string(&original).unwrap(), content);
        prop_assert!(!backup.exists());
    }

    #[test]
    fn substitute_removes_every_match(
        parts in prop::collection::vec("[a-z ]{0,10}", 1..6),
    ) {
        let content = parts.join("INTERVAL 2");
        let rule = PatchRule::new("INTERVAL 2", "INTERVAL 1");

        match rule.substitute(&content) {
            patch_guard::Substitution::Replaced { content: patched, count } => {
                prop_assert_eq!(count, parts.len() - 1);
                prop_assert!(!patched.contains("INTERVAL 2"));
            }
            _ => prop_assert_eq!(parts.len(), 1),
        }
    }
}
