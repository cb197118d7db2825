//! MQTT topic filter compilation
//!
//! Filters are compiled once, at registration, into an anchored regular
//! expression:
//!
//! - `+` matches exactly one level of one or more non-`/` characters
//! - `#` matches the rest of the topic, including zero further levels,
//!   so `a/#` matches `a`, `a/b` and `a/b/c`
//! - everything else matches literally

use crate::error::RouterError;
use regex::Regex;

/// A validated topic filter with its compiled matcher
#[derive(Debug, Clone)]
pub struct TopicPattern {
    pattern: String,
    regex: Regex,
}

impl TopicPattern {
    /// Validate and compile a topic filter
    pub fn compile(pattern: &str) -> Result<Self, RouterError> {
        let source = Self::to_regex_source(pattern)?;
        let regex = Regex::new(&source).map_err(|source| RouterError::Compile {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Translate a filter into regex source (pure function)
    pub fn to_regex_source(pattern: &str) -> Result<String, RouterError> {
        let invalid = |reason: &str| RouterError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.is_empty() {
            return Err(invalid("filter is empty"));
        }

        let levels: Vec<&str> = pattern.split('/').collect();
        let last = levels.len() - 1;
        let mut source = String::from("^");

        for (index, level) in levels.iter().enumerate() {
            match *level {
                "#" => {
                    if index != last {
                        return Err(invalid("'#' is only allowed as the last level"));
                    }
                    if index == 0 {
                        source.push_str(".*");
                    } else {
                        source.push_str("(?:/.*)?");
                    }
                }
                "+" => {
                    if index > 0 {
                        source.push('/');
                    }
                    source.push_str("[^/]+");
                }
                literal => {
                    if literal.contains('+') || literal.contains('#') {
                        return Err(invalid("wildcards must occupy a whole level"));
                    }
                    if index > 0 {
                        source.push('/');
                    }
                    source.push_str(&regex::escape(literal));
                }
            }
        }

        source.push('$');
        Ok(source)
    }

    /// Check a concrete topic against the filter
    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }

    /// The filter as registered
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Whether the filter contains `+` or `#`
    pub fn has_wildcards(&self) -> bool {
        self.pattern.split('/').any(|level| level == "+" || level == "#")
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pattern)
    }
}
