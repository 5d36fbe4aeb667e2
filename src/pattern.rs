//! Ant-style path pattern matcher (C1).
//!
//! Supported tokens, scoped to a single `/`-separated segment unless noted:
//! - `?`       exactly one non-`/` character
//! - `*`       zero or more non-`/` characters within the segment
//! - `**`      zero or more whole segments (greedy, backtracks on failure)
//! - `{name}`  capture the segment as `name`
//! - `{name:regex}` capture the segment as `name`, constrained by `regex`

use std::fmt;

use regex::Regex;
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("duplicate capture name {0:?} in pattern")]
    DuplicateCapture(String),

    #[error("invalid regex in capture {0:?}: {1}")]
    InvalidRegex(String, regex::Error),
}

#[derive(Debug, Clone)]
enum Segment {
    /// A literal segment, matched verbatim (no wildcard tokens at all).
    Literal(String),
    /// A segment built from `?`/`*` glob tokens, compiled to a regex that
    /// matches within one segment (no `/`).
    Glob(Regex),
    /// A named capture, optionally regex-constrained.
    Capture { name: String, regex: Option<Regex> },
    /// `**`: zero or more whole segments.
    DoubleStar,
}

/// A compiled Ant-style pattern, ready to match against request paths.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    segments: Vec<Segment>,
}

impl fmt::Display for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let mut names = HashSet::new();
        let mut segments = Vec::new();

        for raw in pattern.split('/').filter(|s| !s.is_empty()) {
            if raw == "**" {
                segments.push(Segment::DoubleStar);
                continue;
            }

            if let Some(capture) = parse_capture(raw)? {
                if let Segment::Capture { name, .. } = &capture {
                    if !names.insert(name.clone()) {
                        return Err(PatternError::DuplicateCapture(name.clone()));
                    }
                }
                segments.push(capture);
                continue;
            }

            if raw.contains('?') || raw.contains('*') {
                segments.push(Segment::Glob(glob_to_regex(raw)));
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// Match `path` against this pattern, returning captured named
    /// parameters on success. Matching is deterministic: for a pattern with
    /// no wildcard tokens, success iff the segment lists are equal.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = HashMap::new();
        if match_segments(&self.segments, &path_segments, &mut params) {
            Some(params)
        } else {
            None
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

fn parse_capture(raw: &str) -> Result<Option<Segment>, PatternError> {
    if !(raw.starts_with('{') && raw.ends_with('}')) {
        return Ok(None);
    }

    let inner = &raw[1..raw.len() - 1];
    let (name, regex_src) = match inner.split_once(':') {
        Some((n, r)) => (n, Some(r)),
        None => (inner, None),
    };

    let regex = match regex_src {
        Some(r) => {
            let anchored = format!("^(?:{r})$");
            Some(Regex::new(&anchored).map_err(|e| PatternError::InvalidRegex(name.to_string(), e))?)
        }
        None => None,
    };

    Ok(Some(Segment::Capture {
        name: name.to_string(),
        regex,
    }))
}

fn glob_to_regex(raw: &str) -> Regex {
    let mut out = String::from("^");
    for ch in raw.chars() {
        match ch {
            '?' => out.push_str("[^/]"),
            '*' => out.push_str("[^/]*"),
            c if "\\.+^$()[]{}|".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out).expect("glob-derived regex is always valid")
}

/// Left-to-right match with backtracking confined to `**`: when a
/// `DoubleStar` segment is encountered we try consuming 0..=n path segments,
/// recursing on the remainder, and accept the first split that lets the
/// rest of the pattern match.
fn match_segments(
    pattern: &[Segment],
    path: &[&str],
    params: &mut HashMap<String, String>,
) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(Segment::DoubleStar) => {
            let rest_pattern = &pattern[1..];
            for split in 0..=path.len() {
                let mut trial = params.clone();
                if match_segments(rest_pattern, &path[split..], &mut trial) {
                    *params = trial;
                    return true;
                }
            }
            false
        }
        Some(seg) => {
            let Some((head, tail)) = path.split_first() else {
                return false;
            };

            let matched = match seg {
                Segment::Literal(lit) => lit == head,
                Segment::Glob(re) => re.is_match(head),
                Segment::Capture { name, regex } => {
                    let ok = regex.as_ref().map(|r| r.is_match(head)).unwrap_or(true);
                    if ok {
                        params.insert(name.clone(), head.to_string());
                    }
                    ok
                }
                Segment::DoubleStar => unreachable!(),
            };

            matched && match_segments(&pattern[1..], tail, params)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_requires_exact_segments() {
        let pattern = CompiledPattern::compile("/api/users").unwrap();
        assert!(pattern.matches("/api/users").is_some());
        assert!(pattern.matches("/api/users/1").is_none());
        assert!(pattern.matches("/api").is_none());
    }

    #[test]
    fn question_mark_matches_single_char() {
        let pattern = CompiledPattern::compile("/a?c").unwrap();
        assert!(pattern.matches("/abc").is_some());
        assert!(pattern.matches("/ac").is_none());
        assert!(pattern.matches("/abbc").is_none());
    }

    #[test]
    fn star_matches_within_segment_only() {
        let pattern = CompiledPattern::compile("/files/*.txt").unwrap();
        assert!(pattern.matches("/files/a.txt").is_some());
        assert!(pattern.matches("/files/a/b.txt").is_none());
    }

    #[test]
    fn double_star_matches_zero_or_more_segments() {
        let pattern = CompiledPattern::compile("/static/**/*.js").unwrap();
        assert!(pattern.matches("/static/a.js").is_some());
        assert!(pattern.matches("/static/a/b/c.js").is_some());
        assert!(pattern.matches("/static/a/b.css").is_none());
    }

    #[test]
    fn named_capture_extracts_segment() {
        let pattern = CompiledPattern::compile("/api/users/{id}").unwrap();
        let params = pattern.matches("/api/users/42").unwrap();
        assert_eq!(params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn named_capture_with_regex_constrains_value() {
        let pattern = CompiledPattern::compile("/api/users/{id:[0-9]+}").unwrap();
        assert!(pattern.matches("/api/users/42").is_some());
        assert!(pattern.matches("/api/users/abc").is_none());
    }

    #[test]
    fn duplicate_capture_names_are_rejected() {
        let err = CompiledPattern::compile("/api/{id}/sub/{id}").unwrap_err();
        assert!(matches!(err, PatternError::DuplicateCapture(name) if name == "id"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let pattern = CompiledPattern::compile("/API/users").unwrap();
        assert!(pattern.matches("/api/users").is_none());
    }
}
