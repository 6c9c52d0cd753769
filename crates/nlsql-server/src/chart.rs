//! Heuristic chart recommendation for successful results

use nlsql_core::ResultSet;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    TimeSeries,
    Bar,
    Histogram,
    Scatter,
    Pie,
    Table,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartHint {
    pub kind: ChartKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_axis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_axis: Option<String>,
    pub reason: String,
}

/// Picks a chart from the question wording, then the SQL, then the result shape
pub struct ChartRecommender {
    wording: Vec<(Regex, ChartKind, &'static str)>,
    grouped: Regex,
    aggregate: Regex,
}

impl ChartRecommender {
    pub fn new() -> Result<Self, regex::Error> {
        let wording = vec![
            (
                Regex::new(r"(?i)\b(trend|over time|by (day|week|month|quarter|year)|per (day|week|month)|daily|weekly|monthly|growth)\b")?,
                ChartKind::TimeSeries,
                "question asks for a trend over time",
            ),
            (
                Regex::new(r"(?i)\b(compare|top|rank|most|least|highest|lowest)\b")?,
                ChartKind::Bar,
                "question compares or ranks items",
            ),
            (
                Regex::new(r"(?i)\b(distribution|histogram|spread|range)\b")?,
                ChartKind::Histogram,
                "question asks how values are distributed",
            ),
            (
                Regex::new(r"(?i)\b(relationship|correlation|impact)\b")?,
                ChartKind::Scatter,
                "question asks how two measures relate",
            ),
            (
                Regex::new(r"(?i)\b(share|percentage|ratio|portion|proportion)\b")?,
                ChartKind::Pie,
                "question asks for parts of a whole",
            ),
        ];

        Ok(Self {
            wording,
            grouped: Regex::new(r"(?i)\bgroup\s+by\b")?,
            aggregate: Regex::new(r"(?i)\b(sum|avg|count|min|max)\s*\(")?,
        })
    }

    pub fn recommend(&self, question: &str, sql: &str, rows: &ResultSet) -> ChartHint {
        if rows.is_empty() {
            return hint(ChartKind::None, None, None, "no rows to plot");
        }
        if rows.columns.len() < 2 {
            return hint(ChartKind::Table, rows.columns.first().cloned(), None, "single column result");
        }

        let (kind, reason) = self
            .wording
            .iter()
            .find(|(pattern, _, _)| pattern.is_match(question))
            .map(|(_, kind, reason)| (*kind, *reason))
            .or_else(|| {
                if self.grouped.is_match(sql) {
                    Some((ChartKind::Bar, "statement groups rows"))
                } else if self.aggregate.is_match(sql) {
                    Some((ChartKind::Bar, "statement aggregates values"))
                } else {
                    None
                }
            })
            .unwrap_or((ChartKind::Table, "no chart fits better than a table"));

        let x_axis = rows.columns.first().cloned();
        let y_axis = rows.columns.last().cloned();
        hint(kind, x_axis, y_axis, reason)
    }
}

fn hint(kind: ChartKind, x_axis: Option<String>, y_axis: Option<String>, reason: &str) -> ChartHint {
    ChartHint {
        kind,
        x_axis,
        y_axis,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlsql_core::Row;
    use serde_json::json;

    fn result(columns: &[&str], n: usize) -> ResultSet {
        let rows = (0..n)
            .map(|i| {
                columns
                    .iter()
                    .map(|c| (c.to_string(), json!(i)))
                    .collect::<Row>()
            })
            .collect();
        ResultSet::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    #[test]
    fn test_grouped_aggregate_is_bar() {
        let chart = ChartRecommender::new().unwrap().recommend(
            "total sales per region in 2024",
            "SELECT region, SUM(amount) AS total FROM sales WHERE year = 2024 GROUP BY region",
            &result(&["region", "total"], 4),
        );
        assert_eq!(chart.kind, ChartKind::Bar);
        assert_eq!(chart.x_axis.as_deref(), Some("region"));
        assert_eq!(chart.y_axis.as_deref(), Some("total"));
    }

    #[test]
    fn test_wording_wins_over_sql() {
        let recommender = ChartRecommender::new().unwrap();
        let rows = result(&["month", "revenue"], 12);
        let sql = "SELECT month, SUM(revenue) FROM sales GROUP BY month";

        assert_eq!(
            recommender.recommend("revenue trend in 2024", sql, &rows).kind,
            ChartKind::TimeSeries
        );
        assert_eq!(
            recommender.recommend("Revenue by month", sql, &rows).kind,
            ChartKind::TimeSeries
        );
        assert_eq!(
            recommender.recommend("share of revenue per product", sql, &rows).kind,
            ChartKind::Pie
        );
        assert_eq!(
            recommender.recommend("correlation between price and quantity", sql, &rows).kind,
            ChartKind::Scatter
        );
    }

    #[test]
    fn test_plain_listing_is_table() {
        let chart = ChartRecommender::new().unwrap().recommend(
            "list customers in Oslo",
            "SELECT name, city FROM customers WHERE city = 'Oslo'",
            &result(&["name", "city"], 3),
        );
        assert_eq!(chart.kind, ChartKind::Table);
    }

    #[test]
    fn test_shape_overrides() {
        let recommender = ChartRecommender::new().unwrap();
        assert_eq!(
            recommender.recommend("top products", "SELECT 1", &result(&["a", "b"], 0)).kind,
            ChartKind::None
        );
        assert_eq!(
            recommender
                .recommend("how many orders", "SELECT COUNT(*) AS n FROM orders", &result(&["n"], 1))
                .kind,
            ChartKind::Table
        );
    }
}
