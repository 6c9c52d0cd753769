//! MCP (Model Context Protocol) server implementation

use async_trait::async_trait;
use rust_mcp_schema::{
    schema_utils::CallToolError, CallToolRequest, CallToolResult, ContentBlock, Implementation,
    InitializeResult, ListToolsRequest, ListToolsResult, RpcError, ServerCapabilities,
    ServerCapabilitiesTools, TextContent, Tool, ToolInputSchema, LATEST_PROTOCOL_VERSION,
};
use rust_mcp_sdk::mcp_server::{hyper_server, HyperServerOptions};
use rust_mcp_sdk::{mcp_server::ServerHandler, McpServer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::app::{AppState, QueryInput};

/// nlsql MCP Server Handler
pub struct NlsqlServerHandler {
    state: AppState,
}

fn property(kind: &str, description: &str) -> Map<String, Value> {
    let mut prop = Map::new();
    prop.insert("type".to_string(), Value::String(kind.to_string()));
    prop.insert("description".to_string(), Value::String(description.to_string()));
    prop
}

fn text_result(text: String, is_error: bool) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::TextContent(TextContent::new(text, None, None))],
        is_error: is_error.then_some(true),
        meta: None,
        structured_content: None,
    }
}

impl NlsqlServerHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Create server initialization details
    pub fn server_info() -> InitializeResult {
        InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools { list_changed: None }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "nlsql-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("nlsql Natural Language to SQL Server".to_string()),
            },
            instructions: Some(
                "nlsql Server - natural language questions answered with guarded SQL. \
                 Use the 'catalog' tool to see the schema and the 'query' tool to ask a question."
                    .to_string(),
            ),
            meta: None,
        }
    }

    /// Define available MCP tools
    fn tools() -> Vec<Tool> {
        let mut query_props = HashMap::new();
        query_props.insert(
            "query".to_string(),
            property("string", "Natural language question (e.g., 'total sales per region in 2024')"),
        );
        query_props.insert(
            "max_regenerations".to_string(),
            property("integer", "Repair attempts allowed for this question, capped by the server setting"),
        );
        query_props.insert(
            "summarize".to_string(),
            property("boolean", "Also return a prose answer summarizing the rows"),
        );

        let mut catalog_props = HashMap::new();
        catalog_props.insert(
            "format".to_string(),
            property("string", "'markdown' (default) or 'json'"),
        );

        vec![
            Tool {
                name: "query".to_string(),
                description: Some(
                    "Answer a natural language question against the database. A SQL statement is \
                     generated, checked against the guardrail rules, executed, and repaired on \
                     failure. Returns the outcome, the final SQL, rows and the attempt history."
                        .to_string(),
                ),
                input_schema: ToolInputSchema::new(vec!["query".to_string()], Some(query_props)),
                title: None,
                annotations: None,
                meta: None,
                output_schema: None,
            },
            Tool {
                name: "catalog".to_string(),
                description: Some(
                    "Get the database catalog: tables, column types and sample values.".to_string(),
                ),
                input_schema: ToolInputSchema::new(vec![], Some(catalog_props)),
                title: None,
                annotations: None,
                meta: None,
                output_schema: None,
            },
        ]
    }

    async fn handle_query_tool(&self, arguments: Option<Map<String, Value>>) -> Result<CallToolResult, CallToolError> {
        let args = arguments.ok_or_else(|| CallToolError::from_message("Missing arguments"))?;
        let input: QueryInput = serde_json::from_value(Value::Object(args))
            .map_err(|e| CallToolError::from_message(format!("Invalid arguments: {}", e)))?;

        let response = self
            .state
            .answer(input)
            .await
            .map_err(|e| CallToolError::from_message(e.to_string()))?;

        let text = serde_json::to_string_pretty(&response).map_err(|e| {
            error!("Failed to serialize response: {}", e);
            CallToolError::from_message(format!("Failed to serialize response: {}", e))
        })?;

        Ok(text_result(text, !response.result.is_success()))
    }

    async fn handle_catalog_tool(&self, arguments: Option<Map<String, Value>>) -> Result<CallToolResult, CallToolError> {
        let format = arguments
            .as_ref()
            .and_then(|args| args.get("format"))
            .and_then(Value::as_str)
            .unwrap_or("markdown")
            .to_string();

        let catalog = self.state.catalog().await.map_err(|e| {
            error!("Failed to extract catalog: {}", e);
            CallToolError::from_message(format!("Failed to extract catalog: {}", e))
        })?;

        let text = if format == "json" {
            serde_json::to_string_pretty(catalog.as_ref())
                .map_err(|e| CallToolError::from_message(format!("Failed to serialize catalog: {}", e)))?
        } else {
            catalog.to_markdown()
        };

        Ok(text_result(text, false))
    }
}

#[async_trait]
impl ServerHandler for NlsqlServerHandler {
    async fn handle_list_tools_request(
        &self,
        _request: ListToolsRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<ListToolsResult, RpcError> {
        info!("Listing available tools");

        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn handle_call_tool_request(
        &self,
        request: CallToolRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        info!("Tool called: {}", request.params.name);

        match request.params.name.as_str() {
            "query" => self.handle_query_tool(request.params.arguments).await,
            "catalog" => self.handle_catalog_tool(request.params.arguments).await,
            _ => Err(CallToolError::unknown_tool(request.params.name.clone())),
        }
    }
}

/// Serve MCP over HTTP with SSE support
pub async fn serve(state: AppState, host: String, port: u16) -> Result<(), String> {
    info!("Starting nlsql MCP server on {}:{}", host, port);

    let server = hyper_server::create_server(
        NlsqlServerHandler::server_info(),
        NlsqlServerHandler::new(state),
        HyperServerOptions {
            host,
            port,
            sse_support: true,
            ..Default::default()
        },
    );

    server.start().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::state;

    const GOOD: &str = "SELECT region, SUM(amount) AS total FROM sales WHERE year = 2024 GROUP BY region";

    fn args(value: Value) -> Option<Map<String, Value>> {
        value.as_object().cloned()
    }

    fn text_of(result: &CallToolResult) -> &str {
        match &result.content[0] {
            ContentBlock::TextContent(text) => &text.text,
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn test_tools_listed() {
        let tools = NlsqlServerHandler::tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["query", "catalog"]);
    }

    #[tokio::test]
    async fn test_query_tool() {
        let handler = NlsqlServerHandler::new(state(vec![GOOD], 2));
        let result = handler
            .handle_query_tool(args(serde_json::json!({"query": "total sales per region in 2024"})))
            .await
            .unwrap();

        assert!(result.is_error.is_none());
        let json: Value = serde_json::from_str(text_of(&result)).unwrap();
        assert_eq!(json["outcome"], "success");
    }

    #[tokio::test]
    async fn test_query_tool_flags_unsuccessful_runs() {
        let handler = NlsqlServerHandler::new(state(vec!["DELETE FROM sales"], 0));
        let result = handler
            .handle_query_tool(args(serde_json::json!({"query": "clear sales"})))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).contains("\"exhausted\""));
    }

    #[tokio::test]
    async fn test_query_tool_requires_query() {
        let handler = NlsqlServerHandler::new(state(vec![GOOD], 2));
        assert!(handler.handle_query_tool(None).await.is_err());
        assert!(handler
            .handle_query_tool(args(serde_json::json!({"summarize": true})))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_catalog_tool() {
        let handler = NlsqlServerHandler::new(state(vec![GOOD], 2));
        let result = handler.handle_catalog_tool(None).await.unwrap();
        assert!(text_of(&result).contains("## Table: `sales`"));
    }
}
