use serde::Serialize;

/// A literal substring substitution applied to a guarded file.
///
/// Every occurrence of `match_text` is replaced. No regex, no anchoring:
/// the rule matches exactly the bytes it names, whitespace included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchRule {
    /// Text to search for
    pub match_text: String,
    /// Text written in its place
    pub replacement_text: String,
}

/// What a rule found when run over some content.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Substitution carries the patched content; check which variant was produced"]
pub enum Substitution {
    /// `match_text` was present; `content` is the rewritten text
    Replaced { content: String, count: usize },
    /// `match_text` is absent but `replacement_text` is present
    AlreadyApplied,
    /// Neither side of the rule is present (upstream file changed?)
    Missing,
}

impl PatchRule {
    pub fn new(match_text: impl Into<String>, replacement_text: impl Into<String>) -> Self {
        Self {
            match_text: match_text.into(),
            replacement_text: replacement_text.into(),
        }
    }

    /// Run the rule over `content` without touching the filesystem.
    ///
    /// An empty `match_text` never matches; `str::replace` would otherwise
    /// insert the replacement between every character.
    pub fn substitute(&self, content: &str) -> Substitution {
        if !self.match_text.is_empty() && content.contains(&self.match_text) {
            let count = content.matches(&self.match_text).count();
            return Substitution::Replaced {
                content: content.replace(&self.match_text, &self.replacement_text),
                count,
            };
        }

        if !self.replacement_text.is_empty() && content.contains(&self.replacement_text) {
            Substitution::AlreadyApplied
        } else {
            Substitution::Missing
        }
    }

    /// A rule is idempotent when applying it twice equals applying it once.
    ///
    /// That fails when the replacement re-introduces the match text.
    pub fn is_idempotent(&self) -> bool {
        self.match_text.is_empty() || !self.replacement_text.contains(&self.match_text)
    }
}
