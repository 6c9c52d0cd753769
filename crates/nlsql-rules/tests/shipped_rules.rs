//! The rules file shipped at the workspace root loads and blocks what it documents.

use nlsql_rules::{RuleSet, Validator};
use std::path::PathBuf;
use std::sync::Arc;

fn shipped() -> Validator {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../rules.yaml");
    Validator::new(Arc::new(RuleSet::load(path).unwrap()))
}

fn failed_rules(validator: &Validator, sql: &str) -> Vec<String> {
    validator.validate(sql).blocking().map(|v| v.rule.clone()).collect()
}

#[test]
fn test_bounded_read_passes_cleanly() {
    let verdict = shipped().validate("SELECT region, SUM(amount) AS total FROM sales GROUP BY region LIMIT 10");
    assert!(verdict.passed());
    assert!(verdict.violations().is_empty());
}

#[test]
fn test_unbounded_star_read_passes_with_advisories() {
    let verdict = shipped().validate("SELECT * FROM sales");
    assert!(verdict.passed());
    let advisories: Vec<&str> = verdict.advisories().map(|v| v.rule.as_str()).collect();
    assert_eq!(advisories, vec!["no-select-star", "prefer-limit"]);
}

#[test]
fn test_cte_is_a_read() {
    let verdict = shipped().validate("WITH t AS (SELECT region FROM sales) SELECT region FROM t LIMIT 5");
    assert!(verdict.passed());
}

#[test]
fn test_writes_are_blocked() {
    let validator = shipped();
    assert_eq!(failed_rules(&validator, "DROP TABLE sales"), vec!["read-only", "no-destructive"]);
    assert_eq!(
        failed_rules(&validator, "SELECT region FROM sales LIMIT 1; DELETE FROM sales"),
        vec!["no-destructive", "single-statement"]
    );
}

#[test]
fn test_file_readers_are_blocked() {
    let rules = failed_rules(&shipped(), "SELECT name FROM read_csv('/etc/passwd') LIMIT 1");
    assert_eq!(rules, vec!["no-file-readers"]);
}

#[test]
fn test_file_reads_in_other_spellings_are_blocked() {
    let validator = shipped();
    assert_eq!(
        failed_rules(&validator, "SELECT * FROM '/etc/passwd' LIMIT 1"),
        vec!["no-file-paths"]
    );
    assert_eq!(
        failed_rules(&validator, "SELECT * FROM \"read_csv\"('/etc/passwd') LIMIT 1"),
        vec!["no-file-readers"]
    );
    assert_eq!(
        failed_rules(&validator, "SELECT * FROM read_ndjson_auto('/etc/x.json') LIMIT 1"),
        vec!["no-file-readers"]
    );
    assert_eq!(
        failed_rules(&validator, "SELECT * FROM parquet_scan('s3://bucket/x.parquet') LIMIT 1"),
        vec!["no-file-readers"]
    );
}

#[test]
fn test_string_comparison_is_not_a_file_path() {
    let verdict = shipped().validate("SELECT region FROM sales WHERE region = 'north' LIMIT 5");
    assert!(verdict.passed());
}
