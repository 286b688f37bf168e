use crate::guard::DEFAULT_BACKUP_SUFFIX;
use crate::rule::PatchRule;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchDefinition>,
}

impl PatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        if let Some(suffix) = &self.meta.backup_suffix {
            if suffix.trim().is_empty() {
                issues.push(ValidationIssue::InvalidCombo {
                    patch_id: None,
                    message: "meta.backup_suffix must not be empty".to_string(),
                });
            }
        }

        let mut seen_ids: HashMap<&str, usize> = HashMap::new();
        let mut seen_targets: HashMap<(Option<&str>, &str), &str> = HashMap::new();

        for patch in &self.patches {
            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            } else {
                let count = seen_ids.entry(patch.id.as_str()).or_insert(0);
                *count += 1;
                if *count == 2 {
                    issues.push(ValidationIssue::DuplicateId {
                        patch_id: patch.id.clone(),
                    });
                }
            }

            if patch.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: Some(patch.id.clone()),
                    field: "file",
                });
            } else {
                let key = (patch.package.as_deref(), patch.file.as_str());
                if let Some(first) = seen_targets.insert(key, patch.id.as_str()) {
                    issues.push(ValidationIssue::SharedTarget {
                        first: first.to_string(),
                        second: patch.id.clone(),
                        file: patch.file.clone(),
                    });
                }
            }

            if let Some(package) = &patch.package {
                if package.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        patch_id: Some(patch.id.clone()),
                        field: "package",
                    });
                }
            }

            if patch.search.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: Some(patch.id.clone()),
                    field: "search",
                });
                continue;
            }

            if patch.search == patch.replace {
                issues.push(ValidationIssue::InvalidCombo {
                    patch_id: Some(patch.id.clone()),
                    message: "search and replace are identical".to_string(),
                });
            } else if !patch.rule().is_idempotent() {
                issues.push(ValidationIssue::InvalidCombo {
                    patch_id: Some(patch.id.clone()),
                    message: "replace contains search; applying twice would patch twice"
                        .to_string(),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Backup suffix for patches without an explicit `backup` path.
    pub fn backup_suffix(&self) -> &str {
        self.meta
            .backup_suffix
            .as_deref()
            .unwrap_or(DEFAULT_BACKUP_SUFFIX)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub backup_suffix: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchDefinition {
    pub id: String,
    /// Target file; relative to the package directory when `package` is
    /// set, otherwise to the workspace unless absolute
    pub file: String,
    /// PlatformIO package that owns the file (e.g. `framework-arduinoteensy`)
    #[serde(default)]
    pub package: Option<String>,
    /// Explicit backup path, overriding `<file><backup_suffix>`
    #[serde(default)]
    pub backup: Option<String>,
    /// Exact text to search for
    pub search: String,
    /// Text to put in its place
    pub replace: String,
}

impl PatchDefinition {
    pub fn rule(&self) -> PatchRule {
        PatchRule::new(self.search.clone(), self.replace.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyPatchList,
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    DuplicateId {
        patch_id: String,
    },
    /// Two patches on one file would share a backup and undo each other
    SharedTarget {
        first: String,
        second: String,
        file: String,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch config contains no patches"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::DuplicateId { patch_id } => {
                write!(f, "patch id '{patch_id}' is used more than once")
            }
            ValidationIssue::SharedTarget {
                first,
                second,
                file,
            } => write!(
                f,
                "patches '{first}' and '{second}' both target '{file}'; their backups would collide"
            ),
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
        }
    }
}
