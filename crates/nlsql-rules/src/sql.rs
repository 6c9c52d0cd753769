//! SQL views shared by every rule
//!
//! A statement is tokenized and parsed once with `sqlparser` (DuckDB dialect).
//! Table, CTE and identifier questions are answered from the AST. Keyword and
//! clause matching stays at the token level, where string literals, comments
//! and longer identifiers (`updated_at`) are already separate tokens.

use sqlparser::ast::{Expr, ObjectName, Query, Statement, Visit, Visitor};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, Tokenizer};
use std::ops::ControlFlow;

/// A statement with its tokens and AST
#[derive(Debug, Clone)]
pub struct ParsedSql<'a> {
    text: &'a str,
    /// Tokens without whitespace and comments
    tokens: Result<Vec<Token>, ParserError>,
    statements: Result<Vec<Statement>, ParserError>,
}

impl<'a> ParsedSql<'a> {
    pub fn new(text: &'a str) -> Self {
        let dialect = DuckDbDialect {};

        let tokens = Tokenizer::new(&dialect, text)
            .tokenize()
            .map(|tokens| {
                tokens
                    .into_iter()
                    .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
                    .collect()
            })
            .map_err(|e| ParserError::TokenizerError(e.to_string()));

        let statements = Parser::parse_sql(&dialect, text);
        if let Err(e) = &statements {
            tracing::debug!("SQL parsing failed: {}", e);
        }

        Self {
            text,
            tokens,
            statements,
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn parse_error(&self) -> Option<&ParserError> {
        self.statements.as_ref().err()
    }

    /// First keyword of the statement, skipping leading parentheses
    pub fn leading_keyword(&self) -> Result<Option<String>, &ParserError> {
        let tokens = self.tokens.as_ref()?;
        Ok(tokens
            .iter()
            .find(|t| !matches!(t, Token::LParen))
            .and_then(|t| match t {
                Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_ascii_uppercase()),
                _ => None,
            }))
    }

    /// Whether the given words appear as consecutive unquoted words
    pub fn contains_phrase(&self, phrase: &[String]) -> Result<bool, &ParserError> {
        let tokens = self.tokens.as_ref()?;
        if phrase.is_empty() || phrase.len() > tokens.len() {
            return Ok(false);
        }
        Ok(tokens.windows(phrase.len()).any(|window| {
            window.iter().zip(phrase).all(|(token, word)| {
                matches!(token, Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(word))
            })
        }))
    }

    /// Number of non-empty statements
    pub fn statement_count(&self) -> Result<usize, &ParserError> {
        if let Ok(statements) = &self.statements {
            return Ok(statements.len());
        }
        let tokens = self.tokens.as_ref()?;
        Ok(tokens
            .split(|t| matches!(t, Token::SemiColon))
            .filter(|segment| !segment.is_empty())
            .count())
    }

    /// Dotted identifier paths (`schema.table.column`), lowercased.
    ///
    /// Covers relations, column references and function names. When the
    /// statement does not parse, every dotted word sequence is reported.
    pub fn identifier_paths(&self) -> Result<Vec<String>, &ParserError> {
        match &self.statements {
            Ok(statements) => Ok(collect(statements).identifiers),
            Err(_) => Ok(token_paths(self.tokens.as_ref()?)),
        }
    }

    /// Relations read or written, lowercased, in order of appearance
    pub fn referenced_tables(&self) -> Result<Vec<String>, &ParserError> {
        let statements = self.statements.as_ref()?;
        Ok(collect(statements).relations)
    }

    /// Names defined in WITH clauses at any depth
    pub fn cte_names(&self) -> Result<Vec<String>, &ParserError> {
        let statements = self.statements.as_ref()?;
        Ok(collect(statements).ctes)
    }
}

fn object_path(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Default)]
struct Collector {
    relations: Vec<String>,
    ctes: Vec<String>,
    identifiers: Vec<String>,
}

impl Visitor for Collector {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<()> {
        // DROP targets are not visited as relations
        if let Statement::Drop { names, .. } = statement {
            for name in names {
                let path = object_path(name);
                self.relations.push(path.clone());
                self.identifiers.push(path);
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if let Some(with) = &query.with {
            self.ctes
                .extend(with.cte_tables.iter().map(|cte| cte.alias.name.value.to_ascii_lowercase()));
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        let path = object_path(relation);
        if !self.relations.contains(&path) {
            self.relations.push(path.clone());
        }
        self.identifiers.push(path);
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        match expr {
            Expr::Identifier(ident) => self.identifiers.push(ident.value.to_ascii_lowercase()),
            Expr::CompoundIdentifier(idents) => self.identifiers.push(
                idents
                    .iter()
                    .map(|ident| ident.value.to_ascii_lowercase())
                    .collect::<Vec<_>>()
                    .join("."),
            ),
            Expr::Function(function) => self.identifiers.push(object_path(&function.name)),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn collect(statements: &[Statement]) -> Collector {
    let mut collector = Collector::default();
    for statement in statements {
        let _ = statement.visit(&mut collector);
    }
    collector
}

/// `word (. word)*` runs over the raw tokens
fn token_paths(tokens: &[Token]) -> Vec<String> {
    let mut paths = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let Token::Word(first) = &tokens[i] else {
            i += 1;
            continue;
        };
        let mut path = first.value.to_ascii_lowercase();
        i += 1;
        while let (Some(Token::Period), Some(Token::Word(segment))) = (tokens.get(i), tokens.get(i + 1)) {
            path.push('.');
            path.push_str(&segment.value.to_ascii_lowercase());
            i += 2;
        }
        paths.push(path);
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrase(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_literals_and_comments_are_not_words() {
        let sql = ParsedSql::new("SELECT 'DROP TABLE x' AS s -- DELETE everything\n FROM t /* TRUNCATE */");
        assert_eq!(sql.contains_phrase(&phrase(&["DROP"])), Ok(false));
        assert_eq!(sql.contains_phrase(&phrase(&["DELETE"])), Ok(false));
        assert_eq!(sql.contains_phrase(&phrase(&["TRUNCATE"])), Ok(false));
        assert_eq!(sql.contains_phrase(&phrase(&["from", "t"])), Ok(true));
    }

    #[test]
    fn test_identifier_is_not_split_into_keywords() {
        let sql = ParsedSql::new("SELECT updated_at FROM orders");
        assert_eq!(sql.contains_phrase(&phrase(&["UPDATE"])), Ok(false));
    }

    #[test]
    fn test_leading_keyword_skips_parentheses() {
        assert_eq!(
            ParsedSql::new("(select 1) union (select 2)").leading_keyword(),
            Ok(Some("SELECT".to_string()))
        );
        assert_eq!(ParsedSql::new("  ").leading_keyword(), Ok(None));
    }

    #[test]
    fn test_statement_count() {
        assert_eq!(ParsedSql::new("SELECT 1;").statement_count(), Ok(1));
        assert_eq!(ParsedSql::new("SELECT 1; DROP TABLE t").statement_count(), Ok(2));
        assert_eq!(ParsedSql::new("SELECT ';' ;;").statement_count(), Ok(1));
    }

    #[test]
    fn test_referenced_tables() {
        let sql = ParsedSql::new(
            "SELECT r.name, SUM(s.amount) FROM sales s JOIN main.regions AS r ON s.region_id = r.id \
             WHERE EXTRACT(YEAR FROM s.sold_at) = 2024 GROUP BY r.name",
        );
        assert_eq!(sql.referenced_tables().unwrap(), vec!["sales", "main.regions"]);
    }

    #[test]
    fn test_referenced_tables_comma_list_and_subquery() {
        let sql = ParsedSql::new("SELECT * FROM a x, b WHERE x.id IN (SELECT id FROM c) AND a.v IS DISTINCT FROM b.v");
        assert_eq!(sql.referenced_tables().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_alias_column_list_does_not_hide_later_tables() {
        let sql = ParsedSql::new("SELECT * FROM sales AS s(a, b, c), employees");
        assert_eq!(sql.referenced_tables().unwrap(), vec!["sales", "employees"]);
    }

    #[test]
    fn test_table_functions_are_relations() {
        let sql = ParsedSql::new("SELECT * FROM \"read_csv\"('/tmp/x.csv')");
        assert_eq!(sql.referenced_tables().unwrap(), vec!["read_csv"]);
    }

    #[test]
    fn test_cte_names() {
        let sql = ParsedSql::new("WITH totals AS (SELECT 1) SELECT * FROM totals");
        assert_eq!(sql.cte_names().unwrap(), vec!["totals"]);
    }

    #[test]
    fn test_identifier_paths() {
        let sql = ParsedSql::new("SELECT c.\"SSN\", lower(name) FROM crm.customers c");
        let paths = sql.identifier_paths().unwrap();
        assert!(paths.contains(&"c.ssn".to_string()));
        assert!(paths.contains(&"crm.customers".to_string()));
        assert!(paths.contains(&"lower".to_string()));
        assert!(paths.contains(&"name".to_string()));
    }

    #[test]
    fn test_drop_targets_are_reported() {
        let sql = ParsedSql::new("DROP TABLE hr.users");
        assert_eq!(sql.referenced_tables().unwrap(), vec!["hr.users"]);
        assert!(sql.identifier_paths().unwrap().contains(&"hr.users".to_string()));
    }

    #[test]
    fn test_unparsable_statement() {
        let sql = ParsedSql::new("SELECT FROM WHERE (");
        assert!(sql.parse_error().is_some());
        assert!(sql.referenced_tables().is_err());
        assert!(sql.cte_names().is_err());
        // Token views still answer
        assert_eq!(sql.leading_keyword(), Ok(Some("SELECT".to_string())));
        assert!(sql.identifier_paths().unwrap().contains(&"where".to_string()));
    }

    #[test]
    fn test_untokenizable_statement() {
        let sql = ParsedSql::new("SELECT 'unterminated");
        assert!(sql.leading_keyword().is_err());
        assert!(sql.contains_phrase(&phrase(&["SELECT"])).is_err());
        assert!(sql.statement_count().is_err());
    }
}
