//! Denylist compilation and matching

use std::sync::Arc;

/// One compiled denylist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenRule {
    pub pattern: String,
    /// Strict rules only match whole tokens
    pub strict: bool,
}

impl ForbiddenRule {
    /// Test a term that has already been folded with [`fold_for_matching`]
    pub fn matches(&self, folded: &str) -> bool {
        if !self.strict {
            return folded.contains(&self.pattern);
        }

        let pattern: Vec<&str> = self.pattern.split_whitespace().collect();
        let tokens: Vec<&str> = folded.split_whitespace().collect();
        if pattern.is_empty() || tokens.len() < pattern.len() {
            return false;
        }
        tokens.windows(pattern.len()).any(|window| window == pattern.as_slice())
    }
}

/// A compiled denylist together with the text it was built from
#[derive(Debug, Default)]
pub struct ForbiddenSet {
    source: String,
    rules: Vec<ForbiddenRule>,
}

impl ForbiddenSet {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            rules: compile(source),
        }
    }

    /// Reuse `current` when the denylist text did not change
    pub fn refresh(current: &Arc<ForbiddenSet>, source: &str) -> Arc<ForbiddenSet> {
        if current.source == source {
            current.clone()
        } else {
            Arc::new(Self::new(source))
        }
    }

    pub fn rules(&self) -> &[ForbiddenRule] {
        &self.rules
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether any rule rejects the term
    pub fn rejects(&self, term: &str) -> bool {
        let folded = fold_for_matching(term);
        if folded.is_empty() {
            return false;
        }
        self.rules.iter().any(|rule| rule.matches(&folded))
    }
}

/// Compile denylist text into rules.
///
/// Entries are separated by commas or newlines. A trailing `!` marks a strict
/// entry. Characters outside `[a-z0-9:]` below U+00FF collapse into spaces.
pub fn compile(text: &str) -> Vec<ForbiddenRule> {
    let normalized = text
        .trim()
        .to_lowercase()
        .replace('，', ",")
        .replace('！', "!");

    normalized
        .split([',', '\n'])
        .filter_map(|entry| {
            let mut entry = entry.trim();
            let strict = entry.ends_with('!');
            if strict {
                entry = &entry[..entry.len() - 1];
            }
            let pattern = collapse_pattern(entry);
            if pattern.is_empty() {
                None
            } else {
                Some(ForbiddenRule { pattern, strict })
            }
        })
        .collect()
}

fn collapse_pattern(entry: &str) -> String {
    let mut out = String::with_capacity(entry.len());
    let mut pending_space = false;
    for c in entry.chars() {
        let keep = c.is_ascii_lowercase() || c.is_ascii_digit() || c == ':' || c as u32 >= 0xFF;
        if keep {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Lower-case and replace ASCII punctuation other than `:` with spaces
pub fn fold_for_matching(term: &str) -> String {
    let lowered: String = term
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_alphanumeric() && c != ':' { ' ' } else { c })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}
