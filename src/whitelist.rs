//! Per-service include/exclude rules deciding which volume files are synced.
//!
//! Patterns are shell-style and applied to the whole relative path string:
//! `*` matches any run of characters including `/`, `?` matches one
//! character, `[...]` and `[!...]` are character classes. A `[` without a
//! closing `]` is literal.

use crate::config::ServicePatterns;
use indexmap::IndexMap;
use regex::Regex;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WhitelistError {
    #[error("invalid pattern {pattern:?} for service {service}: {source}")]
    InvalidPattern {
        service: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Outcome of evaluating one path, naming the pattern that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<'a> {
    Excluded(&'a str),
    Included(&'a str),
    NoMatch,
}

impl Decision<'_> {
    pub fn is_included(&self) -> bool {
        matches!(self, Decision::Included(_))
    }
}

/// Translates a shell-style pattern into an anchored regular expression.
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^(?s:");
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => {
                while chars.get(i) == Some(&'*') {
                    i += 1;
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '[' => {
                let mut j = i;
                if chars.get(j) == Some(&'!') {
                    j += 1;
                }
                if chars.get(j) == Some(&']') {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str(r"\[");
                    continue;
                }

                let mut body = &chars[i..j];
                out.push('[');
                if body.first() == Some(&'!') {
                    out.push('^');
                    body = &body[1..];
                }
                for &b in body {
                    if matches!(b, '\\' | '[' | ']' | '&' | '~' | '^') {
                        out.push('\\');
                    }
                    out.push(b);
                }
                out.push(']');
                i = j + 1;
            }
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }

    out.push_str(r")\z");
    out
}

#[derive(Debug)]
struct PatternList {
    patterns: Vec<String>,
    regexes: Vec<Regex>,
}

impl PatternList {
    fn compile(service: &str, patterns: &[String]) -> Result<Self, WhitelistError> {
        let regexes = patterns
            .iter()
            .map(|pattern| {
                Regex::new(&translate(pattern)).map_err(|source| WhitelistError::InvalidPattern {
                    service: service.to_string(),
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(Self {
            patterns: patterns.to_vec(),
            regexes,
        })
    }

    /// The earliest listed pattern matching `path`.
    fn first_match(&self, path: &str) -> Option<&str> {
        self.regexes
            .iter()
            .position(|re| re.is_match(path))
            .map(|i| self.patterns[i].as_str())
    }
}

#[derive(Debug)]
struct ServiceRules {
    include: PatternList,
    exclude: PatternList,
}

#[derive(Debug, Default)]
pub struct Whitelist {
    services: IndexMap<String, ServiceRules>,
}

impl Whitelist {
    pub fn compile(services: &IndexMap<String, ServicePatterns>) -> Result<Self, WhitelistError> {
        let services = services
            .iter()
            .map(|(name, patterns)| {
                let rules = ServiceRules {
                    include: PatternList::compile(name, &patterns.include)?,
                    exclude: PatternList::compile(name, &patterns.exclude)?,
                };
                Ok((name.clone(), rules))
            })
            .collect::<Result<_, WhitelistError>>()?;

        Ok(Self { services })
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Exclude patterns win over include patterns; a path matching neither
    /// is excluded. Services without rules exclude everything.
    pub fn evaluate(&self, service: &str, relative_path: &str) -> Decision<'_> {
        let Some(rules) = self.services.get(service) else {
            return Decision::NoMatch;
        };
        if let Some(pattern) = rules.exclude.first_match(relative_path) {
            return Decision::Excluded(pattern);
        }
        match rules.include.first_match(relative_path) {
            Some(pattern) => Decision::Included(pattern),
            None => Decision::NoMatch,
        }
    }

    pub fn should_include(&self, service: &str, relative_path: &Path) -> bool {
        let relative = relative_path.to_string_lossy();
        let decision = self.evaluate(service, &relative);
        match &decision {
            Decision::Excluded(pattern) => {
                debug!("Excluding {} (matches exclude pattern: {})", relative, pattern)
            }
            Decision::Included(pattern) => {
                debug!("Including {} (matches include pattern: {})", relative, pattern)
            }
            Decision::NoMatch => debug!("Excluding {} (no include pattern match)", relative),
        }
        decision.is_included()
    }

    pub fn write_summary<W: Write>(&self, out: &mut W, source: &Path) -> io::Result<()> {
        writeln!(out, "\n=== WHITELIST CONFIGURATION SUMMARY ===")?;
        writeln!(out, "Configuration file: {}", source.display())?;

        if self.services.is_empty() {
            return writeln!(out, "No whitelist patterns loaded!");
        }

        for (service, rules) in &self.services {
            writeln!(out, "\n{}:", service.to_uppercase())?;
            writeln!(out, "  Include patterns ({}):", rules.include.patterns.len())?;
            for pattern in &rules.include.patterns {
                writeln!(out, "    + {}", pattern)?;
            }
            writeln!(out, "  Exclude patterns ({}):", rules.exclude.patterns.len())?;
            for pattern in &rules.exclude.patterns {
                writeln!(out, "    - {}", pattern)?;
            }
        }
        Ok(())
    }
}
