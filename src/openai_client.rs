// src/openai_client.rs
use futures::stream::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CHAT_MODEL: &str = "gpt-4o";

#[derive(Error, Debug)]
pub enum OpenAiError {
    #[error("Request to OpenAI failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("OpenAI returned HTTP {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Stream error: {0}")]
    Stream(String),
}

/// Incremental completion tokens as they arrive from the provider.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, OpenAiError>> + Send>>;

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ProviderMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One line of the provider's SSE body.
#[derive(Debug, PartialEq)]
enum StreamLine {
    Token(String),
    Done,
    Ignore,
}

fn parse_stream_line(line: &str) -> StreamLine {
    let Some(data) = line.strip_prefix("data: ") else {
        return StreamLine::Ignore;
    };
    if data.trim() == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(StreamLine::Token)
            .unwrap_or(StreamLine::Ignore),
        Err(e) => {
            tracing::debug!("Skipping unparseable stream line: {}", e);
            StreamLine::Ignore
        }
    }
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            client: Client::new(),
            api_key,
            base_url,
            model: CHAT_MODEL.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Requests a streamed chat completion and returns the provider's
    /// content deltas as they arrive. Chunk boundaries do not align with
    /// SSE lines, so partial lines are carried over between chunks.
    pub async fn stream_chat_completion(
        &self,
        messages: Vec<ProviderMessage>,
    ) -> Result<TokenStream, OpenAiError> {
        let request_body = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OpenAiError::Api { status, body });
        }

        let mut bytes = response.bytes_stream();
        let tokens = async_stream::stream! {
            let mut carry = String::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(bytes) => {
                        carry.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = carry.find('\n') {
                            let line = carry[..pos].trim_end_matches('\r').to_string();
                            carry.drain(..=pos);
                            match parse_stream_line(&line) {
                                StreamLine::Token(token) => yield Ok(token),
                                StreamLine::Done => return,
                                StreamLine::Ignore => {}
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(OpenAiError::Stream(e.to_string()));
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(tokens))
    }
}
