//! Rule definitions and their compiled, checkable form

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sqlparser::parser::ParserError;

use crate::sql::ParsedSql;
use crate::RuleError;

/// Whether a violated rule fails validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Blocking,
    Advisory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    /// Violated when the pattern matches
    #[default]
    Deny,
    /// Violated when the pattern does not match
    Require,
}

fn default_true() -> bool {
    true
}

/// Declarative rule as written in the rules file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(flatten)]
    pub kind: RuleKind,
}

/// Check kinds, tagged by `kind` in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    ForbiddenKeywords {
        keywords: Vec<String>,
    },
    StatementType {
        allow: Vec<String>,
    },
    Pattern {
        pattern: String,
        #[serde(default)]
        mode: PatternMode,
        #[serde(default = "default_true")]
        case_insensitive: bool,
    },
    RequiredClause {
        clause: String,
    },
    IdentifierBlocklist {
        identifiers: Vec<String>,
    },
    AllowedTables {
        tables: Vec<String>,
    },
    SingleStatement,
}

/// A violated rule, as recorded in a verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub severity: Severity,
    pub description: String,
    /// What in the statement triggered the rule
    pub detail: String,
}

/// Multi-word keyword such as `GROUP BY`, stored as uppercase words
type Phrase = Vec<String>;

#[derive(Debug, Clone)]
enum Check {
    ForbiddenKeywords(Vec<Phrase>),
    StatementType(Vec<String>),
    Pattern { regex: Regex, mode: PatternMode },
    RequiredClause(Phrase),
    IdentifierBlocklist(Vec<String>),
    AllowedTables(Vec<String>),
    SingleStatement,
}

/// A compiled rule. Immutable once built.
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    severity: Severity,
    description: String,
    check: Check,
}

fn phrase(text: &str) -> Phrase {
    text.split_whitespace().map(str::to_ascii_uppercase).collect()
}

fn non_empty_list(rule: &str, field: &'static str, items: &[String]) -> Result<Vec<String>, RuleError> {
    let items: Vec<String> = items
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return Err(RuleError::EmptyList {
            rule: rule.to_string(),
            field,
        });
    }
    Ok(items)
}

impl Rule {
    /// Compile a definition, rejecting anything malformed
    pub fn compile(def: &RuleDefinition) -> Result<Self, RuleError> {
        let name = def.name.trim();
        if name.is_empty() {
            return Err(RuleError::EmptyName);
        }

        let (check, default_description) = match &def.kind {
            RuleKind::ForbiddenKeywords { keywords } => {
                let keywords = non_empty_list(name, "keywords", keywords)?;
                let description = format!("Statement must not use: {}", keywords.join(", ").to_uppercase());
                (Check::ForbiddenKeywords(keywords.iter().map(|k| phrase(k)).collect()), description)
            }
            RuleKind::StatementType { allow } => {
                let allow = non_empty_list(name, "allow", allow)?;
                let allow: Vec<String> = allow.iter().map(|k| k.to_ascii_uppercase()).collect();
                let description = format!("Statement must start with one of: {}", allow.join(", "));
                (Check::StatementType(allow), description)
            }
            RuleKind::Pattern {
                pattern,
                mode,
                case_insensitive,
            } => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(*case_insensitive)
                    .build()
                    .map_err(|source| RuleError::InvalidPattern {
                        rule: name.to_string(),
                        source,
                    })?;
                let description = match mode {
                    PatternMode::Deny => format!("Statement must not match /{}/", pattern),
                    PatternMode::Require => format!("Statement must match /{}/", pattern),
                };
                (Check::Pattern { regex, mode: *mode }, description)
            }
            RuleKind::RequiredClause { clause } => {
                let words = phrase(clause);
                if words.is_empty() {
                    return Err(RuleError::EmptyList {
                        rule: name.to_string(),
                        field: "clause",
                    });
                }
                let description = format!("Statement must contain a {} clause", words.join(" "));
                (Check::RequiredClause(words), description)
            }
            RuleKind::IdentifierBlocklist { identifiers } => {
                let identifiers = non_empty_list(name, "identifiers", identifiers)?;
                let description = format!("Statement must not reference: {}", identifiers.join(", "));
                (
                    Check::IdentifierBlocklist(identifiers.iter().map(|i| i.to_ascii_lowercase()).collect()),
                    description,
                )
            }
            RuleKind::AllowedTables { tables } => {
                let tables = non_empty_list(name, "tables", tables)?;
                let description = format!("Statement may only read from: {}", tables.join(", "));
                (
                    Check::AllowedTables(tables.iter().map(|t| t.to_ascii_lowercase()).collect()),
                    description,
                )
            }
            RuleKind::SingleStatement => (
                Check::SingleStatement,
                "Exactly one statement per request".to_string(),
            ),
        };

        Ok(Self {
            name: name.to_string(),
            severity: def.severity,
            description: def.description.clone().unwrap_or(default_description),
            check,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Evaluate against one statement. Pure: no I/O, no state.
    pub fn check(&self, sql: &ParsedSql<'_>) -> Option<Violation> {
        self.evaluate(sql).map(|detail| Violation {
            rule: self.name.clone(),
            severity: self.severity,
            description: self.description.clone(),
            detail,
        })
    }

    fn evaluate(&self, sql: &ParsedSql<'_>) -> Option<String> {
        match &self.check {
            Check::ForbiddenKeywords(keywords) => {
                let mut found: Vec<String> = Vec::new();
                for keyword in keywords {
                    match sql.contains_phrase(keyword) {
                        Ok(true) => found.push(keyword.join(" ")),
                        Ok(false) => {}
                        Err(e) => return Some(unreadable(e)),
                    }
                }
                (!found.is_empty()).then(|| format!("forbidden keyword(s) used: {}", found.join(", ")))
            }
            Check::StatementType(allow) => match sql.leading_keyword() {
                Ok(Some(kw)) if allow.contains(&kw) => None,
                Ok(Some(kw)) => Some(format!("statement type {} is not allowed", kw)),
                Ok(None) => Some("statement has no leading keyword".to_string()),
                Err(e) => Some(unreadable(e)),
            },
            Check::Pattern { regex, mode } => {
                let matched = regex.find(sql.text());
                match (mode, matched) {
                    (PatternMode::Deny, Some(m)) => Some(format!("matched '{}'", m.as_str())),
                    (PatternMode::Require, None) => Some("required pattern not found".to_string()),
                    _ => None,
                }
            }
            Check::RequiredClause(words) => match sql.contains_phrase(words) {
                Ok(true) => None,
                Ok(false) => Some(format!("missing {} clause", words.join(" "))),
                Err(e) => Some(unreadable(e)),
            },
            Check::IdentifierBlocklist(blocked) => {
                let paths = match sql.identifier_paths() {
                    Ok(paths) => paths,
                    Err(e) => return Some(unreadable(e)),
                };
                let found: Vec<&str> = blocked
                    .iter()
                    .filter(|id| paths.iter().any(|path| path_references(path, id)))
                    .map(String::as_str)
                    .collect();
                (!found.is_empty()).then(|| format!("blocked identifier(s) referenced: {}", found.join(", ")))
            }
            Check::AllowedTables(allowed) => {
                let (tables, ctes) = match (sql.referenced_tables(), sql.cte_names()) {
                    (Ok(tables), Ok(ctes)) => (tables, ctes),
                    (Err(e), _) | (_, Err(e)) => return Some(unreadable(e)),
                };
                let mut denied: Vec<String> = Vec::new();
                for table in tables {
                    let bare = table.rsplit('.').next().unwrap_or(&table);
                    let permitted = allowed.iter().any(|a| *a == table || a == bare)
                        || ctes.iter().any(|c| *c == table);
                    if !permitted && !denied.contains(&table) {
                        denied.push(table);
                    }
                }
                (!denied.is_empty()).then(|| format!("unauthorized table(s): {}", denied.join(", ")))
            }
            Check::SingleStatement => match sql.statement_count() {
                Ok(count) if count > 1 => Some(format!("{} statements found", count)),
                Ok(_) => None,
                Err(e) => Some(unreadable(e)),
            },
        }
    }
}

/// A statement the rule cannot inspect fails it
fn unreadable(error: &ParserError) -> String {
    format!("statement could not be parsed: {}", error)
}

/// `crm.customers.ssn` references `ssn`, `customers.ssn` and the full path
fn path_references(path: &str, id: &str) -> bool {
    if id.contains('.') {
        path == id || path.ends_with(&format!(".{}", id))
    } else {
        path.split('.').any(|segment| segment == id)
    }
}
