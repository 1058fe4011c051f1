use chrono::{DateTime, Local};
use futures::StreamExt;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid API key")]
    Authentication,
    #[error("rate limited by completion endpoint")]
    RateLimit,
    #[error("completion API error ({code}): {message}")]
    Api { code: String, message: String },
    #[error("failed to write streamed output: {0}")]
    Output(#[from] std::io::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

pub struct ChatClient {
    client: Client,
    base_url: String,
    api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ChatError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: None,
            max_tokens: None,
        })
    }

    /// Sends the message list with streaming enabled, writes each delta
    /// token to `sink` as it arrives, and returns the assembled reply.
    pub async fn stream_chat<W: Write>(
        &self,
        messages: &[Message],
        sink: &mut W,
    ) -> Result<String, ChatError> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        };

        debug!("streaming completion with {}", self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("completion API error: {} - {}", status, error_text);

            return Err(match status.as_u16() {
                401 => ChatError::Authentication,
                429 => ChatError::RateLimit,
                _ => ChatError::Api {
                    code: status.to_string(),
                    message: error_text,
                },
            });
        }

        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut reply = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| ChatError::Network(e.to_string()))?;
            for event in drain_sse_events(&mut buffer, &String::from_utf8_lossy(&chunk)) {
                if let Some(token) = parse_sse_line(&event) {
                    write!(sink, "{token}")?;
                    sink.flush()?;
                    reply.push_str(&token);
                }
            }
        }
        // A final line without a trailing newline still carries data.
        if let Some(token) = parse_sse_line(buffer.trim_end()) {
            write!(sink, "{token}")?;
            sink.flush()?;
            reply.push_str(&token);
        }

        Ok(reply)
    }
}

/// Appends `chunk` to `buffer` and drains every complete line. SSE events
/// can be split across HTTP chunks, so partial lines stay buffered.
fn drain_sse_events(buffer: &mut String, chunk: &str) -> Vec<String> {
    buffer.push_str(chunk);
    let mut events = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim_end();
        if !line.is_empty() {
            events.push(line.to_string());
        }
    }
    events
}

/// Extracts the delta content from one `data:` line, if any.
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }
    let response: StreamResponse = serde_json::from_str(data).ok()?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// One persisted history turn.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HistoryRecord {
    pub role: String,
    pub content: String,
    pub at: DateTime<Local>,
}

/// A chat session: the working message chain sent to the API, plus an
/// append-only history of everything said, optionally persisted to disk.
pub struct ChatSession {
    client: ChatClient,
    chain: Vec<Message>,
    history: Vec<HistoryRecord>,
    history_path: Option<PathBuf>,
}

impl ChatSession {
    pub fn new(client: ChatClient, history_path: Option<PathBuf>) -> Self {
        Self {
            client,
            chain: Vec::new(),
            history: Vec::new(),
            history_path,
        }
    }

    pub fn chain(&self) -> &[Message] {
        &self.chain
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    /// Removes prior system messages from the working chain so each turn
    /// carries exactly one freshly retrieved context.
    pub fn drop_context(&mut self) {
        self.chain.retain(|m| m.role != "system");
    }

    fn push(&mut self, message: Message) {
        self.history.push(HistoryRecord {
            role: message.role.clone(),
            content: message.content.clone(),
            at: Local::now(),
        });
        self.chain.push(message);
    }

    /// Runs one turn: swap in the fresh system prompt, append the user
    /// query, stream the reply to `sink`, and record the assistant turn.
    pub async fn process_and_chat<W: Write>(
        &mut self,
        query: &str,
        system_prompt: String,
        sink: &mut W,
    ) -> Result<String, ChatError> {
        self.drop_context();
        self.push(Message::system(system_prompt));
        self.push(Message::user(query));

        let reply = self.client.stream_chat(&self.chain, sink).await?;
        self.push(Message::assistant(reply.clone()));

        if let Some(path) = &self.history_path {
            if let Err(e) = save_history(path, &self.history).await {
                error!("failed to persist chat history: {e}");
            }
        }

        Ok(reply)
    }
}

async fn save_history(path: &PathBuf, history: &[HistoryRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(history)?;
    fs::write(path, json).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sse_line_extracts_delta() {
        let line = r#"data: {"id":"chatcmpl-123","choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_sse_line(line), Some("Hello".to_string()));
    }

    #[test]
    fn parse_sse_line_handles_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]"), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#),
            None
        );
    }

    #[test]
    fn drain_sse_events_survives_chunk_boundaries() {
        let mut buffer = String::new();

        // A data line split mid-JSON across two chunks.
        let first = drain_sse_events(&mut buffer, "data: {\"choices\":[{\"delta\":{\"con");
        assert!(first.is_empty());

        let second = drain_sse_events(&mut buffer, "tent\":\"Hi\"}}]}\ndata: [DONE]\n");
        assert_eq!(second.len(), 2);
        assert_eq!(parse_sse_line(&second[0]), Some("Hi".to_string()));
        assert_eq!(parse_sse_line(&second[1]), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_sse_events_skips_blank_lines() {
        let mut buffer = String::new();
        let events = drain_sse_events(&mut buffer, "data: a\r\n\r\ndata: b\n");
        assert_eq!(events, vec!["data: a".to_string(), "data: b".to_string()]);
    }

    fn test_session() -> ChatSession {
        let client = ChatClient::new("http://localhost:9", "test-key", "test-model").unwrap();
        ChatSession::new(client, None)
    }

    #[test]
    fn drop_context_keeps_conversation_turns() {
        let mut session = test_session();
        session.push(Message::system("old context"));
        session.push(Message::user("hello"));
        session.push(Message::assistant("hi"));

        session.drop_context();

        assert_eq!(
            session.chain(),
            &[Message::user("hello"), Message::assistant("hi")]
        );
        // History stays append-only.
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.history()[0].role, "system");
    }

    #[test]
    fn completion_request_serialization_omits_unset_fields() {
        let messages = vec![Message::user("hi")];
        let request = CompletionRequest {
            model: "m",
            messages: &messages,
            temperature: None,
            max_tokens: None,
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
        assert!(json.get("temperature").is_none());
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
