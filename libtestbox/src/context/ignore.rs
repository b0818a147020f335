//! `.dockerignore` loading and matching.
//!
//! Patterns follow the conventions of directory-context build tooling: they
//! are anchored at the context root, `*` and `?` never cross a `/`, `**`
//! spans any number of directories, and a leading `!` re-includes paths an
//! earlier pattern excluded. The last matching pattern decides.

use std::fs;
use std::io;
use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::error::RequestError;
use crate::utils::clean_path;

/// Name of the ignore file looked up in the context root.
pub const IGNORE_FILE: &str = ".dockerignore";

/// One compiled exclusion (or, when negated, re-inclusion) rule.
#[derive(Debug, Clone)]
pub struct IgnorePattern {
    pattern: String,
    negated: bool,
    regex: Regex,
}

impl IgnorePattern {
    /// Compile a single pattern line. The returned error is the reason the
    /// pattern was rejected.
    pub fn new(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (negated, body) = match line.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, line),
        };
        if body.is_empty() {
            return Err("illegal exclusion pattern: \"!\"".to_string());
        }

        let mut pattern = clean_path(body);
        if pattern.len() > 1 && pattern.starts_with('/') {
            pattern.remove(0);
        }
        let regex = Regex::new(&glob_to_regex(&pattern)).map_err(|e| e.to_string())?;

        Ok(Self {
            pattern,
            negated,
            regex,
        })
    }

    /// The cleaned pattern, without its `!` marker.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether this is a `!` re-inclusion rule.
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// Translate a cleaned glob into an anchored regular expression.
fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // `**/` behaves like `**`.
                if chars.peek() == Some(&'/') {
                    chars.next();
                }
                if chars.peek().is_none() {
                    regex.push_str(".*");
                } else {
                    regex.push_str("(.*/)?");
                }
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            // An escaped character always matches itself, and a trailing
            // backslash matches a literal backslash. Neither is handed to the
            // regex engine as an escape sequence.
            '\\' => match chars.next() {
                Some(escaped) => regex.push_str(&regex::escape(&escaped.to_string())),
                None => regex.push_str(r"\\"),
            },
            '.' | '+' | '(' | ')' | '|' | '{' | '}' | '$' => {
                regex.push('\\');
                regex.push(ch);
            }
            other => regex.push(other),
        }
    }
    regex.push('$');
    regex
}

/// The ordered rules loaded from one ignore file.
#[derive(Debug, Clone, Default)]
pub struct IgnorePatterns {
    patterns: Vec<IgnorePattern>,
}

impl IgnorePatterns {
    /// Parse ignore-file contents. `source` is only used to label errors.
    pub fn parse(source: &Path, content: &str) -> Result<Self, RequestError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut patterns = Vec::new();
        for line in content.lines() {
            // Comments are recognised before trimming.
            if line.starts_with('#') {
                continue;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let pattern = IgnorePattern::new(line).map_err(|reason| RequestError::IgnorePattern {
                path: source.to_path_buf(),
                pattern: line.to_string(),
                reason,
            })?;
            patterns.push(pattern);
        }
        Ok(Self { patterns })
    }

    /// Compile patterns given directly rather than read from a file.
    pub fn from_lines<I, S>(lines: I) -> Result<Self, RequestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let content = lines
            .into_iter()
            .map(|line| line.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        Self::parse(Path::new("<inline>"), &content)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IgnorePattern> {
        self.patterns.iter()
    }

    /// Whether any `!` rule exists.
    pub fn has_negations(&self) -> bool {
        self.patterns.iter().any(IgnorePattern::is_negated)
    }

    /// Whether some `!` rule could re-include a path below the directory
    /// `dir` (a slash-separated path relative to the context root).
    pub fn may_reinclude_under(&self, dir: &str) -> bool {
        let dir_slash = format!("{dir}/");
        self.patterns
            .iter()
            .filter(|p| p.negated)
            .any(|p| format!("{}/", p.pattern).starts_with(&dir_slash))
    }

    /// Whether `rel_path` (slash-separated, relative to the context root) is
    /// excluded, either directly or because one of its parent directories is.
    pub fn matches(&self, rel_path: &str) -> bool {
        let parents: Vec<&str> = match rel_path.rfind('/') {
            Some(idx) => rel_path[..idx].split('/').collect(),
            None => Vec::new(),
        };

        let mut excluded = false;
        for pattern in &self.patterns {
            // An exclusion can't change an excluded path, and a re-inclusion
            // only matters once something excluded it.
            if pattern.negated != excluded {
                continue;
            }
            let hit = pattern.is_match(rel_path)
                || (1..=parents.len()).any(|n| pattern.is_match(&parents[..n].join("/")));
            if hit {
                excluded = !pattern.negated;
            }
        }
        excluded
    }
}

/// Load the ignore rules of a context directory.
///
/// A missing ignore file yields an empty rule set. Any other read failure,
/// and any pattern that does not compile, is an error naming the file.
pub fn load_ignore_patterns(context_dir: &Path) -> Result<IgnorePatterns, RequestError> {
    let location = context_dir.join(IGNORE_FILE);
    let content = match fs::read_to_string(&location) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %location.display(), "no ignore file in build context");
            return Ok(IgnorePatterns::default());
        }
        Err(source) => {
            return Err(RequestError::IgnoreFile {
                path: location,
                source,
            });
        }
    };

    let patterns = IgnorePatterns::parse(&location, &content)?;
    debug!(path = %location.display(), patterns = patterns.len(), "loaded ignore file");
    Ok(patterns)
}
