//! Prompt normalizer: raw user text to a canonical positive/negative tag pair

use tracing::debug;

use super::forbidden::{fold_for_matching, ForbiddenSet};
use super::{BracketDialect, CanonicalPrompt, Placement};
use crate::config::PromptConfig;
use crate::error::SanitationError;

/// Stand-in for a literal `\\` while brackets are rewritten
const BACKSLASH_MASK: &str = "\u{F8FF}";

const NEGATIVE_MARKERS_SPACED: [&str; 2] = ["-u", "--undesired"];
const NEGATIVE_MARKERS_COLON: [&str; 2] = ["negative prompts:", "negative prompt:"];

/// Normalize raw user input into a [`CanonicalPrompt`].
///
/// Word limits are checked before the configured fragments are added, so the
/// base and negative prompts never count against the user.
pub fn normalize(
    raw: &str,
    config: &PromptConfig,
    forbidden: &ForbiddenSet,
    dialect: BracketDialect,
    override_defaults: bool,
) -> Result<CanonicalPrompt, SanitationError> {
    let placement = config.placement;
    let lower_case = config.lower_case;

    if raw.trim().is_empty() {
        let mut positive = Vec::new();
        append_tags(&mut positive, &config.base_prompt, placement, lower_case);
        append_tags(&mut positive, &config.default_prompt, placement, lower_case);
        let mut negative = Vec::new();
        append_tags(&mut negative, &config.negative_prompt, placement, lower_case);
        return Ok(CanonicalPrompt {
            positive_tags: positive,
            negative_tags: negative,
            sanitized_echo: String::new(),
        });
    }

    let input = fold_input(raw, dialect);

    if config.latin_only && !input.chars().all(is_latin) {
        return Err(SanitationError::LatinOnly);
    }

    let mut negative = Vec::new();
    let body = match find_negative_segment(&input) {
        Some((cut, start)) => {
            append_tags(&mut negative, &input[start..], placement, lower_case);
            input[..cut].trim()
        }
        None => input.trim(),
    };

    let mut positive: Vec<String> = Vec::new();
    for term in body.split(',') {
        let term = term.trim();
        if fold_for_matching(term).is_empty() {
            continue;
        }
        if forbidden.rejects(term) {
            debug!(term = %term, "Dropped forbidden term");
            continue;
        }
        let tag = if is_angle_syntax(term) {
            term.replace(' ', "_")
        } else if lower_case {
            term.to_lowercase()
        } else {
            term.to_string()
        };
        if !positive.contains(&tag) {
            positive.push(tag);
        }
    }

    if config.max_words > 0 {
        let count = word_count(&positive).max(word_count(&negative));
        if count > config.max_words {
            return Err(SanitationError::TooManyWords {
                count,
                max: config.max_words,
            });
        }
    }

    let sanitized_echo = positive.join(",");

    if !override_defaults {
        append_tags(&mut positive, &config.base_prompt, placement, lower_case);
        append_tags(&mut negative, &config.negative_prompt, placement, lower_case);
        if config.default_prompt_enabled {
            append_tags(&mut positive, &config.default_prompt, placement, lower_case);
        }
    }

    Ok(CanonicalPrompt {
        positive_tags: positive,
        negative_tags: negative,
        sanitized_echo,
    })
}

/// Fold full-width punctuation and rewrite unescaped brackets for `dialect`
pub fn fold_input(raw: &str, dialect: BracketDialect) -> String {
    let masked = raw
        .replace("\\\\", BACKSLASH_MASK)
        .replace('，', ",")
        .replace('（', "(")
        .replace('）', ")")
        .replace('《', "<")
        .replace('》', ">");

    let converted = match dialect {
        BracketDialect::WebUi => {
            let open = replace_unescaped(&masked, "\\{", '{', "(");
            replace_unescaped(&open, "\\}", '}', ")")
        }
        BracketDialect::Neutral => {
            let open = replace_unescaped(&masked, "\\(", '(', "{");
            replace_unescaped(&open, "\\)", ')', "}")
        }
    };

    converted.replace(BACKSLASH_MASK, "\\").replace('_', " ")
}

fn replace_unescaped(input: &str, escaped: &str, from: char, to: &str) -> String {
    input
        .split(escaped)
        .map(|segment| segment.replace(from, to))
        .collect::<Vec<_>>()
        .join(escaped)
}

fn is_latin(c: char) -> bool {
    c.is_whitespace()
        || c.is_ascii_alphanumeric()
        || c == '_'
        || "\"'“”‘’.,:|\\()[]{}<>-".contains(c)
}

fn is_angle_syntax(term: &str) -> bool {
    term.len() > 2 && term.starts_with('<') && term.ends_with('>')
}

/// Locate a negative-prompt marker at a clause boundary.
///
/// Returns the byte offset where the positive part ends and where the
/// negative text starts.
fn find_negative_segment(input: &str) -> Option<(usize, usize)> {
    for (index, c) in input.char_indices() {
        let marker_at = if c == ',' {
            skip_whitespace(input, index + 1)
        } else if c.is_whitespace() {
            skip_whitespace(input, index)
        } else {
            continue;
        };

        if let Some(start) = match_marker(input, marker_at) {
            if !input[start..].trim().is_empty() {
                return Some((index, start));
            }
        }
    }
    None
}

fn match_marker(input: &str, at: usize) -> Option<usize> {
    let rest = &input[at..];
    for marker in NEGATIVE_MARKERS_SPACED {
        if starts_with_ignore_case(rest, marker)
            && rest[marker.len()..].starts_with(char::is_whitespace)
        {
            return Some(skip_whitespace(input, at + marker.len()));
        }
    }
    for marker in NEGATIVE_MARKERS_COLON {
        if starts_with_ignore_case(rest, marker) {
            return Some(skip_whitespace(input, at + marker.len()));
        }
    }
    None
}

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    haystack
        .get(..prefix.len())
        .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
}

fn skip_whitespace(input: &str, from: usize) -> usize {
    let rest = &input[from..];
    from + (rest.len() - rest.trim_start().len())
}

/// Append comma-separated `text` to `words`, skipping blanks and duplicates
pub(crate) fn append_tags(words: &mut Vec<String>, text: &str, placement: Placement, lower_case: bool) {
    let mut tags: Vec<&str> = text.split(',').collect();
    if placement == Placement::Before {
        tags.reverse();
    }
    for tag in tags {
        let tag = tag.trim();
        let tag = if lower_case { tag.to_lowercase() } else { tag.to_string() };
        if tag.is_empty() || words.contains(&tag) {
            continue;
        }
        match placement {
            Placement::Before => words.insert(0, tag),
            Placement::After => words.push(tag),
        }
    }
}

fn word_count(tags: &[String]) -> usize {
    tags.iter()
        .flat_map(|tag| tag.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|word| !word.is_empty())
        .count()
}
