use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{build_articles_prompt, ArticleDigest, Summarizer};
use crate::error::ServiceError;
use crate::models::{Bias, NeutralSummary};

/// Configuration for the Anthropic API client
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key (from ANTHROPIC_API_KEY env var)
    pub api_key: String,
    /// Model to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,
    /// Temperature (0-1, lower = more deterministic)
    pub temperature: f64,
    /// Maximum tokens in response
    pub max_tokens: u32,
}

impl AnthropicConfig {
    /// Create config from environment variables
    pub fn from_env(model: &str) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set")?;

        Ok(Self::new(api_key, model.to_string()))
    }

    /// Create with custom settings
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

/// Tool definition used to force structured output
struct ToolSpec {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

/// Anthropic API client
pub struct AnthropicClient {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a message with a forced tool call and decode the tool input
    async fn send_with_tool<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
        tool: ToolSpec,
    ) -> Result<T, ServiceError> {
        let tool_name = tool.name;
        let request = AnthropicToolRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            system: Some(system.to_string()),
            messages: vec![Message {
                role: "user".to_string(),
                content: user.to_string(),
            }],
            tools: vec![Tool {
                name: tool.name.to_string(),
                description: tool.description.to_string(),
                input_schema: tool.input_schema,
            }],
            tool_choice: Some(ToolChoice {
                choice_type: "tool".to_string(),
                name: tool_name.to_string(),
            }),
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(ServiceError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status, &body));
        }

        let response: AnthropicResponse = response
            .json()
            .await
            .map_err(ServiceError::from_reqwest)?;

        // Find the tool_use content block
        for content in &response.content {
            if content.content_type == "tool_use" && content.name.as_deref() == Some(tool_name) {
                if let Some(input) = &content.input {
                    return serde_json::from_value(input.clone()).map_err(|e| {
                        ServiceError::InvalidResponse(format!(
                            "failed to parse {tool_name} input: {e}"
                        ))
                    });
                }
            }
        }

        Err(ServiceError::InvalidResponse(format!(
            "no {tool_name} tool_use block in response"
        )))
    }
}

#[async_trait]
impl Summarizer for AnthropicClient {
    async fn summarize(
        &self,
        prompt: &str,
        articles: &[ArticleDigest],
    ) -> Result<NeutralSummary, ServiceError> {
        let tool = ToolSpec {
            name: "submit_issue_summary",
            description: "Submit the neutral headline and summary for the issue",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "Neutral headline"},
                    "summary": {"type": "string", "description": "Neutral summary"}
                },
                "required": ["title", "summary"]
            }),
        };
        let user = build_articles_prompt(articles, None);
        self.send_with_tool(prompt, &user, tool).await
    }

    async fn summarize_bias(
        &self,
        prompt: &str,
        articles: &[ArticleDigest],
        bias: Bias,
    ) -> Result<Vec<String>, ServiceError> {
        let tool = ToolSpec {
            name: "submit_bias_summary",
            description: "Submit bullet points describing this side's coverage",
            input_schema: bullet_schema("bullets"),
        };
        let user = build_articles_prompt(articles, Some(bias));
        let output: BulletOutput = self.send_with_tool(prompt, &user, tool).await?;
        Ok(output.bullets)
    }

    async fn extract_common_points(
        &self,
        prompt: &str,
        articles: &[ArticleDigest],
    ) -> Result<Vec<String>, ServiceError> {
        let tool = ToolSpec {
            name: "submit_common_points",
            description: "Submit facts reported consistently across sides",
            input_schema: bullet_schema("points"),
        };
        let user = build_articles_prompt(articles, None);
        let output: PointsOutput = self.send_with_tool(prompt, &user, tool).await?;
        Ok(output.points)
    }
}

fn bullet_schema(field: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            field: {
                "type": "array",
                "items": {"type": "string"}
            }
        },
        "required": [field]
    })
}

#[derive(Debug, Deserialize)]
struct BulletOutput {
    #[serde(default)]
    bullets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PointsOutput {
    #[serde(default)]
    points: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AnthropicToolRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    choice_type: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}
