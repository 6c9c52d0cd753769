//! Database catalog extraction and the per-process schema cache

use duckdb::{Connection, Result as DuckResult};
use nlsql_duck::{row_to_json, DuckGateway, GatewayError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

const SAMPLE_ROWS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCatalog {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub sample_data: Vec<Map<String, Value>>,
    pub row_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub sample_values: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseCatalog {
    pub tables: Vec<TableCatalog>,
}

impl DatabaseCatalog {
    /// Extract catalog information from a DuckDB connection
    pub fn from_connection(conn: &Connection) -> DuckResult<Self> {
        let mut stmt = conn.prepare(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'main' ORDER BY table_name",
        )?;
        let table_names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<DuckResult<Vec<_>>>()?;

        let mut tables = Vec::new();
        for table_name in table_names {
            match Self::extract_table_info(conn, &table_name) {
                Ok(table) => tables.push(table),
                Err(e) => warn!(table = %table_name, "Skipping table in catalog: {}", e),
            }
        }

        Ok(DatabaseCatalog { tables })
    }

    /// Extract information for a single table
    fn extract_table_info(conn: &Connection, table_name: &str) -> DuckResult<TableCatalog> {
        let mut stmt = conn.prepare(
            "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = 'main' AND table_name = ? \
             ORDER BY ordinal_position",
        )?;
        let columns: Vec<(String, String, String)> = stmt
            .query_map([table_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<DuckResult<Vec<_>>>()?;

        let quoted = table_name.replace('"', "\"\"");
        let row_count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", quoted), [], |row| {
            row.get(0)
        })?;

        let column_names: Vec<String> = columns.iter().map(|(name, _, _)| name.clone()).collect();
        let mut sample_stmt = conn.prepare(&format!("SELECT * FROM \"{}\" LIMIT {}", quoted, SAMPLE_ROWS))?;
        let sample_data: Vec<Map<String, Value>> = sample_stmt
            .query_map([], |row| {
                let values = row_to_json(row, column_names.len())?;
                let sample: Map<String, Value> = column_names.iter().cloned().zip(values).collect();
                Ok(sample)
            })?
            .collect::<DuckResult<Vec<_>>>()?;

        let column_infos = columns
            .into_iter()
            .map(|(name, data_type, is_nullable)| {
                let sample_values = sample_data.iter().filter_map(|row| row.get(&name).cloned()).collect();
                ColumnInfo {
                    name,
                    data_type,
                    is_nullable: is_nullable == "YES",
                    sample_values,
                }
            })
            .collect();

        Ok(TableCatalog {
            name: table_name.to_string(),
            columns: column_infos,
            sample_data,
            row_count: row_count.max(0) as usize,
        })
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Compact schema description for the generator prompt, one table per line
    pub fn to_prompt_context(&self) -> String {
        self.tables
            .iter()
            .map(|table| {
                let columns: Vec<String> = table
                    .columns
                    .iter()
                    .map(|col| {
                        let samples: Vec<String> = col.sample_values.iter().take(3).map(render_sample).collect();
                        if samples.is_empty() {
                            format!("{} {}", col.name, col.data_type)
                        } else {
                            format!("{} {} (e.g. {})", col.name, col.data_type, samples.join(", "))
                        }
                    })
                    .collect();
                format!("{}: {}", table.name, columns.join("; "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Format catalog as markdown
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("# Database Catalog\n\n");
        md.push_str(&format!("**Tables:** {}\n\n", self.tables.len()));

        for table in &self.tables {
            md.push_str(&format!("## Table: `{}`\n\n", table.name));
            md.push_str(&format!("**Rows:** {}\n\n", table.row_count));

            md.push_str("| Column | Type | Nullable | Sample Values |\n");
            md.push_str("|--------|------|----------|---------------|\n");

            for col in &table.columns {
                let nullable = if col.is_nullable { "yes" } else { "" };
                let samples: Vec<String> = col.sample_values.iter().take(3).map(render_sample).collect();
                md.push_str(&format!(
                    "| `{}` | {} | {} | {} |\n",
                    col.name,
                    col.data_type,
                    nullable,
                    samples.join(", ")
                ));
            }

            md.push('\n');
        }

        md
    }
}

fn render_sample(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        _ => value.to_string(),
    }
}

/// Catalog extracted once per process, on first use.
///
/// Extraction runs outside any request's repair loop; a failed extraction is
/// not cached, so the next request retries it.
pub struct SchemaCache {
    gateway: DuckGateway,
    catalog: OnceCell<Arc<DatabaseCatalog>>,
}

impl SchemaCache {
    pub fn new(gateway: DuckGateway) -> Self {
        Self {
            gateway,
            catalog: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<DatabaseCatalog>, GatewayError> {
        self.catalog
            .get_or_try_init(|| async {
                let conn = self.gateway.connection()?;
                let catalog = tokio::task::spawn_blocking(move || DatabaseCatalog::from_connection(&conn))
                    .await
                    .map_err(|e| GatewayError::Worker(e.to_string()))??;
                info!(tables = ?catalog.table_names(), "Schema catalog loaded");
                Ok::<_, GatewayError>(Arc::new(catalog))
            })
            .await
            .cloned()
    }

    /// Prompt text for the generator, or `None` if the catalog cannot be read
    pub async fn prompt_context(&self) -> Option<String> {
        match self.get().await {
            Ok(catalog) if !catalog.tables.is_empty() => Some(catalog.to_prompt_context()),
            Ok(_) => None,
            Err(e) => {
                warn!("Schema catalog unavailable: {}", e);
                None
            }
        }
    }
}
