//! Map DuckDB error text onto the failure taxonomy

use nlsql_core::FailureCategory;

/// Classify a DuckDB error message.
///
/// DuckDB prefixes errors with their class ("Binder Error: ...",
/// "Parser Error: ..."). The class decides; only the text after it may name
/// tables or columns, so it is never searched for keywords when a class is
/// present. Messages without a class fall back to substring matching.
pub fn classify(message: &str) -> FailureCategory {
    match error_class(message) {
        Some((class, detail)) => classify_class(&class, &detail),
        None => classify_text(&message.to_lowercase()),
    }
}

/// Splits `"Binder Error: detail"` into `("binder", "detail")`, lowercased
fn error_class(message: &str) -> Option<(String, String)> {
    let (head, detail) = message.split_once(':')?;
    let class = head.trim().to_lowercase();
    let class = class.strip_suffix(" error")?;
    if class.is_empty() || !class.chars().all(|c| c.is_ascii_alphabetic() || c == ' ') {
        return None;
    }
    Some((class.to_string(), detail.trim().to_lowercase()))
}

fn classify_class(class: &str, detail: &str) -> FailureCategory {
    match class {
        "parser" | "syntax" => FailureCategory::Syntax,
        "binder" | "catalog" | "not implemented" | "dependency" => FailureCategory::Semantic,
        "permission" => FailureCategory::Permission,
        "interrupt" => FailureCategory::Timeout,
        "io" | "connection" | "http" => FailureCategory::Connectivity,
        // Writes against a read-only attachment are reported as invalid input
        "invalid input" if detail.contains("read-only mode") || detail.contains("read only mode") => {
            FailureCategory::Permission
        }
        "invalid input" | "conversion" | "out of range" | "constraint" | "out of memory" => FailureCategory::Data,
        // Not implemented features, unsupported functions and the like came
        // from the statement itself, so another statement may avoid them
        _ => FailureCategory::Semantic,
    }
}

fn classify_text(msg: &str) -> FailureCategory {
    if msg.contains("interrupted") {
        return FailureCategory::Timeout;
    }

    if msg.contains("read-only") || msg.contains("read only") || msg.contains("permission denied") {
        return FailureCategory::Permission;
    }

    if msg.contains("syntax error") {
        return FailureCategory::Syntax;
    }

    if msg.contains("division by zero") || msg.contains("could not convert") {
        return FailureCategory::Data;
    }

    if msg.contains("could not open") || msg.contains("unable to open") {
        return FailureCategory::Connectivity;
    }

    FailureCategory::Semantic
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_errors() {
        assert_eq!(
            classify("Parser Error: syntax error at or near \"FORM\""),
            FailureCategory::Syntax
        );
        assert_eq!(
            classify("Binder Error: Referenced column \"regoin\" not found in FROM clause!"),
            FailureCategory::Semantic
        );
        assert_eq!(
            classify("Catalog Error: Table with name salez does not exist!"),
            FailureCategory::Semantic
        );
        assert_eq!(
            classify("Conversion Error: Could not convert string 'abc' to INT32"),
            FailureCategory::Data
        );
        assert_eq!(
            classify("Out of Range Error: Overflow in multiplication of INT32"),
            FailureCategory::Data
        );
    }

    #[test]
    fn test_names_in_detail_do_not_change_the_class() {
        assert_eq!(
            classify("Catalog Error: Table with name permissions does not exist!\nDid you mean \"user_permissions\"?"),
            FailureCategory::Semantic
        );
        assert_eq!(
            classify("Binder Error: Referenced column \"permission\" not found in FROM clause!"),
            FailureCategory::Semantic
        );
        assert_eq!(
            classify("Binder Error: Referenced column \"interrupted_at\" not found in FROM clause!"),
            FailureCategory::Semantic
        );
        assert_eq!(
            classify("Catalog Error: Table with name read_only_accounts does not exist!"),
            FailureCategory::Semantic
        );
        assert_eq!(
            classify("Parser Error: syntax error at or near \"io\""),
            FailureCategory::Syntax
        );
    }

    #[test]
    fn test_infrastructure_errors() {
        assert_eq!(
            classify("Invalid Input Error: Cannot execute statement of type \"INSERT\" on database \"shop\" which is attached in read-only mode!"),
            FailureCategory::Permission
        );
        assert_eq!(
            classify("Permission Error: File system LocalFileSystem has been disabled by configuration"),
            FailureCategory::Permission
        );
        assert_eq!(
            classify("IO Error: Could not set lock on file \"shop.duckdb\""),
            FailureCategory::Connectivity
        );
        assert_eq!(classify("INTERRUPT Error: Interrupted!"), FailureCategory::Timeout);
    }

    #[test]
    fn test_messages_without_class() {
        assert_eq!(classify("Query interrupted"), FailureCategory::Timeout);
        assert_eq!(classify("permission denied for table sales"), FailureCategory::Permission);
        assert_eq!(classify("unable to open database file"), FailureCategory::Connectivity);
        assert_eq!(classify("Invalid column name: total"), FailureCategory::Semantic);
    }

    #[test]
    fn test_unknown_defaults_to_semantic() {
        assert_eq!(
            classify("Not implemented Error: FULL OUTER JOIN with LATERAL"),
            FailureCategory::Semantic
        );
        assert_eq!(classify("Some New Error: something else"), FailureCategory::Semantic);
    }
}
