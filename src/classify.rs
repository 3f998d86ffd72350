//! Severity classification of build-tool output.
//!
//! A rule list is ordered: for each line the first matching rule decides the
//! line's severity. Narrow rules that downgrade a known benign message must
//! therefore appear before the broad error patterns that would also match it.

use anyhow::{Context, Result};
use regex::Regex;
use std::fmt;

/// Severity of a single output line or of a whole invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[default]
    None,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::None => write!(f, "none"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// What a rule looks for in a line.
#[derive(Debug, Clone)]
pub enum Pattern {
    Substr(String),
    Regex(Regex),
}

impl Pattern {
    fn matches(&self, line: &str) -> bool {
        match self {
            Pattern::Substr(needle) => line.contains(needle.as_str()),
            Pattern::Regex(re) => re.is_match(line),
        }
    }
}

/// A pattern paired with the severity it assigns.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub pattern: Pattern,
    pub severity: Severity,
}

impl ClassificationRule {
    pub fn substr(needle: impl Into<String>, severity: Severity) -> Self {
        Self {
            pattern: Pattern::Substr(needle.into()),
            severity,
        }
    }

    pub fn regex(pattern: &str, severity: Severity) -> Result<Self> {
        let re = Regex::new(pattern)
            .with_context(|| format!("compiling classification pattern '{pattern}'"))?;
        Ok(Self {
            pattern: Pattern::Regex(re),
            severity,
        })
    }
}

/// Accumulated result of classifying a stream of lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub max_severity: Severity,
    /// Lines that matched at warning level or above, in arrival order.
    pub matched: Vec<String>,
}

impl Classification {
    /// Classify one line and fold it into the running result.
    pub fn observe(&mut self, line: &str, rules: &[ClassificationRule]) -> Severity {
        let severity = classify_line(line, rules);
        if severity >= Severity::Warning {
            self.matched.push(line.to_string());
        }
        self.max_severity = self.max_severity.max(severity);
        severity
    }
}

/// Severity of a single line: the first matching rule wins.
pub fn classify_line(line: &str, rules: &[ClassificationRule]) -> Severity {
    rules
        .iter()
        .find(|rule| rule.pattern.matches(line))
        .map(|rule| rule.severity)
        .unwrap_or_default()
}

pub fn classify<'a, I>(lines: I, rules: &[ClassificationRule]) -> Classification
where
    I: IntoIterator<Item = &'a str>,
{
    let mut classification = Classification::default();
    for line in lines {
        classification.observe(line, rules);
    }
    classification
}

/// Rules every tool invocation is checked against.
pub fn base_rules() -> Vec<ClassificationRule> {
    vec![ClassificationRule::substr(
        "command not found",
        Severity::Error,
    )]
}

/// Make and compiler diagnostics.
pub fn make_rules() -> Result<Vec<ClassificationRule>> {
    let mut rules = base_rules();
    rules.extend([
        ClassificationRule::substr("No rule to make target ", Severity::Error),
        ClassificationRule::regex(r"akefile.*was not found\.", Severity::Error)?,
        ClassificationRule::regex(r"Stop\.$", Severity::Error)?,
        ClassificationRule::regex(r":\d+: error:", Severity::Error)?,
        ClassificationRule::regex(r"make\[\d+\]: \*\*\* \[.*\] Error \d+", Severity::Error)?,
        ClassificationRule::regex(r":\d+: warning:", Severity::Warning)?,
        ClassificationRule::regex(r"make(?:\[\d+\])?: \*\*\*/", Severity::Error)?,
        ClassificationRule::substr("Warning: ", Severity::Warning),
    ]);
    Ok(rules)
}

/// Rules for the image build command.
///
/// The image build scripts probe for java and complain when it is absent;
/// that probe is harmless, so it is downgraded ahead of the generic
/// "command not found" error.
pub fn build_rules() -> Result<Vec<ClassificationRule>> {
    let mut rules = vec![ClassificationRule::substr(
        "/bin/bash: java: command not found",
        Severity::Warning,
    )];
    rules.extend(make_rules()?);
    rules.push(ClassificationRule::substr(
        "Component returned failure code",
        Severity::Error,
    ));
    Ok(rules)
}
