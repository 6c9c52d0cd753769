//! Guardrail rules for generated SQL
//!
//! Rules are loaded once at startup from a YAML file, compiled, and shared
//! read-only across every request. Validation runs every rule against the
//! statement and aggregates all violations; only blocking rules fail it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub mod rule;
pub mod sql;

pub use rule::{PatternMode, Rule, RuleDefinition, RuleKind, Severity, Violation};
pub use sql::ParsedSql;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Failed to read rules file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rules YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Rule '{rule}' has an invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },

    #[error("Rule '{rule}' has an empty '{field}'")]
    EmptyList { rule: String, field: &'static str },

    #[error("Rule names must not be empty")]
    EmptyName,

    #[error("Duplicate rule name: {0}")]
    DuplicateName(String),
}

/// On-disk layout of a rules file.
///
/// `blocked_keywords` and `allowed_tables` are the flat guardrail lists used
/// by older deployments; each becomes one blocking rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tables: Vec<String>,
}

impl RuleFile {
    fn into_definitions(self) -> Vec<RuleDefinition> {
        let mut defs = self.rules;
        if !self.blocked_keywords.is_empty() {
            defs.push(RuleDefinition {
                name: "blocked-keywords".to_string(),
                severity: Severity::Blocking,
                description: None,
                kind: RuleKind::ForbiddenKeywords {
                    keywords: self.blocked_keywords,
                },
            });
        }
        if !self.allowed_tables.is_empty() {
            defs.push(RuleDefinition {
                name: "allowed-tables".to_string(),
                severity: Severity::Blocking,
                description: None,
                kind: RuleKind::AllowedTables {
                    tables: self.allowed_tables,
                },
            });
        }
        defs
    }
}

/// Ordered, compiled rules
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// A rule set that passes every statement
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_definitions(defs: &[RuleDefinition]) -> Result<Self, RuleError> {
        let mut rules: Vec<Rule> = Vec::with_capacity(defs.len());
        for def in defs {
            let rule = Rule::compile(def)?;
            if rules.iter().any(|r| r.name() == rule.name()) {
                return Err(RuleError::DuplicateName(rule.name().to_string()));
            }
            rules.push(rule);
        }
        Ok(Self { rules })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, RuleError> {
        // An empty document is an empty rule set, not an error
        if yaml.trim().is_empty() {
            return Ok(Self::empty());
        }
        let file: RuleFile = serde_yaml::from_str(yaml)?;
        Self::from_definitions(&file.into_definitions())
    }

    /// Load and compile a rules file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let rules = Self::from_yaml_str(&contents)?;
        tracing::info!(path = %path.display(), rules = rules.len(), "Loaded guardrail rules");
        Ok(rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }
}

/// Outcome of validating one statement. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    passed: bool,
    violations: Vec<Violation>,
}

impl Verdict {
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        let passed = violations.iter().all(|v| v.severity == Severity::Advisory);
        Self { passed, violations }
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Every violated rule in rule-set order, advisory ones included
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn blocking(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Blocking)
    }

    pub fn advisories(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Advisory)
    }
}

/// Applies a shared rule set to candidate statements
#[derive(Debug, Clone)]
pub struct Validator {
    rules: Arc<RuleSet>,
}

impl Validator {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn validate(&self, sql: &str) -> Verdict {
        let parsed = ParsedSql::new(sql);
        let violations = self
            .rules
            .iter()
            .filter_map(|rule| rule.check(&parsed))
            .collect();
        Verdict::from_violations(violations)
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Arc::new(RuleSet::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
rules:
  - name: read-only
    kind: statement_type
    allow: [SELECT, WITH]
  - name: no-destructive
    kind: forbidden_keywords
    keywords: [DELETE, DROP, TRUNCATE, ALTER]
  - name: needs-limit
    severity: advisory
    kind: required_clause
    clause: LIMIT
"#;

    #[test]
    fn test_load_rules_from_yaml() {
        let rules = RuleSet::from_yaml_str(RULES).unwrap();
        assert_eq!(rules.len(), 3);
        let names: Vec<&str> = rules.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["read-only", "no-destructive", "needs-limit"]);
    }

    #[test]
    fn test_legacy_lists_become_rules() {
        let rules = RuleSet::from_yaml_str("blocked_keywords: [DROP]\nallowed_tables: [sales]").unwrap();
        let validator = Validator::new(Arc::new(rules));

        assert!(validator.validate("SELECT * FROM sales").passed());
        let verdict = validator.validate("DROP TABLE users");
        assert!(!verdict.passed());
        let names: Vec<&str> = verdict.violations().iter().map(|v| v.rule.as_str()).collect();
        assert_eq!(names, vec!["blocked-keywords"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = "rules:\n  - {name: a, kind: single_statement}\n  - {name: a, kind: single_statement}";
        assert!(matches!(RuleSet::from_yaml_str(yaml), Err(RuleError::DuplicateName(n)) if n == "a"));
    }

    #[test]
    fn test_empty_rule_set_passes_everything() {
        assert!(RuleSet::from_yaml_str("").unwrap().is_empty());
        let validator = Validator::default();
        let verdict = validator.validate("DROP TABLE everything");
        assert!(verdict.passed());
        assert!(verdict.violations().is_empty());
    }

    #[test]
    fn test_verdict_aggregates_all_violations() {
        let validator = Validator::new(Arc::new(RuleSet::from_yaml_str(RULES).unwrap()));
        let verdict = validator.validate("DELETE FROM sales");
        assert!(!verdict.passed());
        let names: Vec<&str> = verdict.violations().iter().map(|v| v.rule.as_str()).collect();
        assert_eq!(names, vec!["read-only", "no-destructive", "needs-limit"]);
        assert_eq!(verdict.blocking().count(), 2);
        assert_eq!(verdict.advisories().count(), 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = RuleSet::load("/definitely/not/here/rules.yaml").unwrap_err();
        assert!(matches!(err, RuleError::Io { .. }));
    }
}
