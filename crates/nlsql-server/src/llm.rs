//! OpenAI / Azure OpenAI integration: statement generation and answer summaries

use async_openai::{
    config::{AzureConfig, OpenAIConfig},
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use nlsql_core::{
    FailureCategory, GenerationContext, GenerationFailure, RepairReason, ResultSet, Role, StatementGenerator,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Config, ConfigError, LlmConfig, LlmProvider};

const SYSTEM_PROMPT: &str = "You are an expert SQL developer working against a DuckDB database.
Write exactly one read-only SQL query that answers the user's question.

Rules:
1. Use only tables and columns that appear in the schema.
2. Never modify data or schema (no INSERT, UPDATE, DELETE, DROP, ALTER, CREATE).
3. Output only the SQL query, no explanations, no comments, no markdown.";

const SUMMARY_PROMPT: &str = "You are a helpful data analyst assistant. Write a clear, \
human-readable answer that summarizes or interprets the query results for a non-technical \
audience. Do not mention SQL unless asked.";

/// Rows sent to the model for a summary
const SUMMARY_ROW_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OpenAI API error: {0}")]
    Api(#[from] OpenAIError),

    #[error("Model call timed out after {0} ms")]
    Timeout(u64),

    #[error("Model response had no message content")]
    EmptyResponse,
}

impl From<LlmError> for GenerationFailure {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Api(e) => GenerationFailure::Unreachable(e.to_string()),
            LlmError::Timeout(ms) => GenerationFailure::Timeout(ms),
            LlmError::EmptyResponse => GenerationFailure::Malformed("response had no message content".to_string()),
        }
    }
}

/// Provider-neutral chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptMessage {
    System(String),
    User(String),
    Assistant(String),
}

impl PromptMessage {
    fn into_openai(self) -> Result<ChatCompletionRequestMessage, OpenAIError> {
        Ok(match self {
            PromptMessage::System(content) => ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(content)
                    .build()?,
            ),
            PromptMessage::User(content) => ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(content)
                    .build()?,
            ),
            PromptMessage::Assistant(content) => ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content)
                    .build()?,
            ),
        })
    }
}

/// Instruction appended after a failed statement
fn repair_instruction(reason: &RepairReason) -> String {
    match reason {
        RepairReason::Validation { violations } => {
            let mut text = String::from("That query was rejected by the query guardrails:\n");
            for violation in violations {
                text.push_str(&format!("- {}: {}\n", violation.rule, violation.detail));
            }
            text.push_str("Rewrite it so that it still answers the question without breaking these rules.");
            text
        }
        RepairReason::Execution { failure } => {
            let hint = match failure.category {
                FailureCategory::Syntax => "It does not parse. Fix the syntax.",
                FailureCategory::Semantic => {
                    "It references something that does not exist. Use only tables and columns from the schema."
                }
                FailureCategory::Data => {
                    "It failed on the data itself. Check casts, filters and functions, and limit the number of rows returned."
                }
                _ => "Rewrite it so that it runs.",
            };
            format!("That query failed with this error:\n{}\n{}", failure.message, hint)
        }
    }
}

/// Build the chat for one generation call.
///
/// System prompt and schema first, then the conversation so far, then the
/// question. On regeneration the failed statement is replayed as the
/// assistant's answer, followed by what went wrong.
pub fn generation_prompt(context: GenerationContext<'_>) -> Vec<PromptMessage> {
    let request = context.request;

    let system = match request.schema_hint() {
        Some(schema) => format!("{}\n\nSchema:\n{}", SYSTEM_PROMPT, schema),
        None => SYSTEM_PROMPT.to_string(),
    };
    let mut messages = vec![PromptMessage::System(system)];

    for turn in request.history() {
        messages.push(match turn.role {
            Role::User => PromptMessage::User(turn.content.clone()),
            Role::Assistant => PromptMessage::Assistant(turn.content.clone()),
        });
    }

    messages.push(PromptMessage::User(request.text().to_string()));

    if let Some(repair) = context.repair {
        messages.push(PromptMessage::Assistant(repair.previous_statement.clone()));
        messages.push(PromptMessage::User(repair_instruction(&repair.reason)));
    }

    messages
}

/// Strip markdown fences and whitespace; `None` if nothing is left
pub fn extract_sql(content: &str) -> Option<String> {
    let text = content.trim();

    let body = match text.find("```") {
        Some(start) => {
            let after = &text[start + 3..];
            let (first_line, rest) = after.split_once('\n').unwrap_or(("", after));
            // ```sql opens with a language tag on its own line
            let body = if first_line.trim().chars().all(|c| c.is_ascii_alphanumeric()) {
                rest
            } else {
                after
            };
            match body.find("```") {
                Some(end) => &body[..end],
                None => body,
            }
        }
        None => text,
    };

    let sql = body.trim();
    (!sql.is_empty()).then(|| sql.to_string())
}

fn summary_prompt(question: &str, statement: &str, rows: &ResultSet) -> Vec<PromptMessage> {
    let shown = &rows.rows[..rows.rows.len().min(SUMMARY_ROW_LIMIT)];
    let rows_json = serde_json::to_string(shown).unwrap_or_default();
    let mut body = format!(
        "The user asked:\n\"{}\"\n\nThe following SQL query was executed:\n{}\n\nThese are the results (in JSON format):\n{}",
        question, statement, rows_json
    );
    if rows.len() > SUMMARY_ROW_LIMIT {
        body.push_str(&format!("\n\n(showing {} of {} rows)", SUMMARY_ROW_LIMIT, rows.len()));
    }
    vec![PromptMessage::System(SUMMARY_PROMPT.to_string()), PromptMessage::User(body)]
}

/// Prose answer from a successful run
#[async_trait]
pub trait AnswerSummarizer: Send + Sync {
    async fn summarize(&self, question: &str, statement: &str, rows: &ResultSet) -> Result<String, LlmError>;
}

#[derive(Clone)]
enum ChatClient {
    OpenAi(Client<OpenAIConfig>),
    Azure(Client<AzureConfig>),
}

/// Chat-completion backed generator and summarizer
#[derive(Clone)]
pub struct LlmGenerator {
    client: ChatClient,
    model: String,
    temperature: f32,
    timeout_ms: u64,
}

impl LlmGenerator {
    /// Build a client for the configured provider; secrets come from the environment
    pub fn from_config(config: &LlmConfig) -> Result<Self, ConfigError> {
        let client = match config.provider {
            LlmProvider::OpenAi => {
                let api_key = Config::get_openai_api_key()?;
                ChatClient::OpenAi(Client::with_config(OpenAIConfig::new().with_api_key(api_key)))
            }
            LlmProvider::Azure => {
                let azure = Config::get_azure_settings()?;
                info!(endpoint = %azure.endpoint, deployment = %azure.deployment, "Using Azure OpenAI");
                ChatClient::Azure(Client::with_config(
                    AzureConfig::new()
                        .with_api_base(azure.endpoint)
                        .with_api_version(azure.api_version)
                        .with_deployment_id(azure.deployment)
                        .with_api_key(azure.api_key),
                ))
            }
        };

        info!(model = %config.model, provider = ?config.provider, "Language model client ready");
        Ok(Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_ms: config.timeout_ms,
        })
    }

    async fn complete(&self, messages: Vec<PromptMessage>) -> Result<String, LlmError> {
        let messages = messages
            .into_iter()
            .map(PromptMessage::into_openai)
            .collect::<Result<Vec<_>, _>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .build()?;

        let started = Instant::now();
        let call = async {
            match &self.client {
                ChatClient::OpenAi(client) => client.chat().create(request).await,
                ChatClient::Azure(client) => client.chat().create(request).await,
            }
        };
        let response = tokio::time::timeout(Duration::from_millis(self.timeout_ms), call)
            .await
            .map_err(|_| LlmError::Timeout(self.timeout_ms))??;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model response received"
        );

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl StatementGenerator for LlmGenerator {
    async fn generate(&self, context: GenerationContext<'_>) -> Result<String, GenerationFailure> {
        let content = self.complete(generation_prompt(context)).await?;
        debug!(attempt = context.attempt, "LLM response: {}", content);
        extract_sql(&content).ok_or(GenerationFailure::Empty)
    }
}

#[async_trait]
impl AnswerSummarizer for LlmGenerator {
    async fn summarize(&self, question: &str, statement: &str, rows: &ResultSet) -> Result<String, LlmError> {
        self.complete(summary_prompt(question, statement, rows)).await
    }
}
