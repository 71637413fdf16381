use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, StatusCode, multipart};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::PendingKey;

/// Header that makes ngrok-style tunnels skip their interstitial page
/// and hand the probe real JSON.
const TUNNEL_SKIP_HEADER: &str = "ngrok-skip-browser-warning";

/// Only the connectivity probe is bounded; every other request runs to
/// completion or failure.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct QueryRequest<'a> {
    user_query: &'a str,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
}

#[derive(Serialize)]
struct SaveResponseRequest {
    message_index: usize,
}

#[derive(Serialize)]
struct SaveSelectionRequest<'a> {
    message_index: usize,
    selected_text: &'a str,
}

#[derive(Deserialize)]
struct ChatListResponse {
    chat_ids: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct CreateChatResponse {
    chat_id: String,
}

/// The answer text arrives under `response` from the standard query
/// endpoint and `result` from live search; the first present one wins.
#[derive(Deserialize)]
struct AnswerResponse {
    response: Option<String>,
    result: Option<String>,
}

impl AnswerResponse {
    fn into_text(self) -> Result<String> {
        self.response
            .or(self.result)
            .ok_or_else(|| anyhow!("Backend answer had neither `response` nor `result`"))
    }
}

#[derive(Deserialize)]
struct AckResponse {
    message: Option<String>,
}

/// Why a connectivity probe rejected a candidate URL.
#[derive(Debug)]
pub enum ProbeFailure {
    Timeout,
    Unreachable(String),
    Status(StatusCode),
    Shape,
}

impl ProbeFailure {
    pub fn describe(&self) -> String {
        match self {
            ProbeFailure::Timeout => {
                "Timed out after 10s. Is the backend running and reachable?".to_string()
            }
            ProbeFailure::Unreachable(detail) => {
                format!("Could not reach the backend: {detail}")
            }
            ProbeFailure::Status(status) => {
                format!("Backend answered with status {status}")
            }
            ProbeFailure::Shape => {
                "Reached a server, but it doesn't look like a kbchat backend".to_string()
            }
        }
    }
}

/// A probe body is acceptable when `chat_ids` is an array (empty is a
/// valid cold start).
fn probe_shape_ok(body: &Value) -> bool {
    body.get("chat_ids").is_some_and(Value::is_array)
}

/// Outcome of a spawned backend request, delivered to the event loop
/// over the same channel as terminal input.
#[derive(Debug)]
pub enum BackendEvent {
    SessionsListed(Result<Vec<String>>),
    SessionCreated(Result<String>),
    SessionDeleted { id: String, outcome: Result<()> },
    Answered { session_id: String, outcome: Result<String> },
    DocumentsUploaded(Result<Option<String>>),
    SaveFinished { key: PendingKey, outcome: Result<Option<String>> },
    ProbeFinished { url: String, outcome: Result<(), ProbeFailure> },
}

#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lightweight reachability check used before committing a new URL.
    pub async fn probe(&self) -> Result<(), ProbeFailure> {
        let url = format!("{}/chats/", self.base_url);
        tracing::debug!(%url, "probing backend");

        let response = self
            .client
            .get(&url)
            .header(TUNNEL_SKIP_HEADER, "true")
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeFailure::Timeout
                } else {
                    ProbeFailure::Unreachable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ProbeFailure::Status(response.status()));
        }

        let body: Value = response.json().await.map_err(|_| ProbeFailure::Shape)?;
        if probe_shape_ok(&body) {
            Ok(())
        } else {
            Err(ProbeFailure::Shape)
        }
    }

    pub async fn list_chats(&self) -> Result<Vec<String>> {
        let url = format!("{}/chats/", self.base_url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Listing conversations failed: {}", response.status()));
        }

        let list: ChatListResponse = response.json().await?;
        list.chat_ids
            .ok_or_else(|| anyhow!("Conversation list had no `chat_ids` field"))
    }

    pub async fn create_chat(&self) -> Result<String> {
        let url = format!("{}/create_chat/", self.base_url);

        let response = self.client.post(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Creating a conversation failed: {}. Check the backend URL in settings",
                response.status()
            ));
        }

        let created: CreateChatResponse = response.json().await?;
        Ok(created.chat_id)
    }

    pub async fn delete_chat(&self, id: &str) -> Result<()> {
        let url = format!("{}/chats/{}/", self.base_url, id);

        let response = self.client.delete(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Deleting the conversation failed: {}", response.status()));
        }
        Ok(())
    }

    /// Standard knowledge-base query against the indexed documents.
    pub async fn query(&self, id: &str, text: &str) -> Result<String> {
        let url = format!("{}/query/{}/", self.base_url, id);
        tracing::debug!(chat = id, "sending standard query");

        let response = self
            .client
            .post(&url)
            .json(&QueryRequest { user_query: text })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Query failed: {}", response.status()));
        }

        let answer: AnswerResponse = response.json().await?;
        answer.into_text()
    }

    /// Live web-search query; same text, different endpoint and field.
    pub async fn live_search(&self, id: &str, text: &str) -> Result<String> {
        let url = format!("{}/search/{}/", self.base_url, id);
        tracing::debug!(chat = id, "sending live search");

        let response = self
            .client
            .post(&url)
            .json(&SearchRequest { query: text })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Live search failed: {}", response.status()));
        }

        let answer: AnswerResponse = response.json().await?;
        answer.into_text()
    }

    /// Upload documents into the global knowledge base. Not tied to any
    /// conversation.
    pub async fn upload_documents(&self, paths: &[PathBuf]) -> Result<Option<String>> {
        let url = format!("{}/upload_documents/", self.base_url);

        let mut form = multipart::Form::new();
        for path in paths {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Could not read {}", path.display()))?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("document")
                .to_string();
            form = form.part("files", multipart::Part::bytes(bytes).file_name(name));
        }

        let response = self.client.post(&url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Upload failed: {}", response.status()));
        }

        Ok(ack_message(response).await)
    }

    pub async fn save_response(&self, id: &str, pair_index: usize) -> Result<Option<String>> {
        let url = format!("{}/save_specific_response/{}/", self.base_url, id);

        let response = self
            .client
            .post(&url)
            .json(&SaveResponseRequest { message_index: pair_index })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Saving the response failed: {}", response.status()));
        }

        Ok(ack_message(response).await)
    }

    pub async fn save_selection(
        &self,
        id: &str,
        pair_index: usize,
        selected_text: &str,
    ) -> Result<Option<String>> {
        let url = format!("{}/save_selected_text/{}/", self.base_url, id);

        let response = self
            .client
            .post(&url)
            .json(&SaveSelectionRequest {
                message_index: pair_index,
                selected_text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Saving the selection failed: {}", response.status()));
        }

        Ok(ack_message(response).await)
    }
}

/// The save/upload endpoints return `{ message?: string }`; a missing
/// or unparsable body is not an error.
async fn ack_message(response: reqwest::Response) -> Option<String> {
    response
        .json::<AckResponse>()
        .await
        .ok()
        .and_then(|ack| ack.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answer_prefers_response_over_result() {
        let answer = AnswerResponse {
            response: Some("from query".into()),
            result: Some("from search".into()),
        };
        assert_eq!(answer.into_text().unwrap(), "from query");

        let answer = AnswerResponse {
            response: None,
            result: Some("from search".into()),
        };
        assert_eq!(answer.into_text().unwrap(), "from search");

        let answer = AnswerResponse {
            response: None,
            result: None,
        };
        assert!(answer.into_text().is_err());
    }

    #[test]
    fn probe_accepts_only_chat_id_arrays() {
        assert!(probe_shape_ok(&json!({ "chat_ids": [] })));
        assert!(probe_shape_ok(&json!({ "chat_ids": ["a", "b"] })));
        assert!(!probe_shape_ok(&json!({ "chat_ids": "abc" })));
        assert!(!probe_shape_ok(&json!({ "chats": [] })));
        assert!(!probe_shape_ok(&json!("welcome page")));
    }

    #[test]
    fn wire_field_names_match_the_backend() {
        let query = serde_json::to_value(QueryRequest { user_query: "hi" }).unwrap();
        assert_eq!(query, json!({ "user_query": "hi" }));

        let search = serde_json::to_value(SearchRequest { query: "hi" }).unwrap();
        assert_eq!(search, json!({ "query": "hi" }));

        let save = serde_json::to_value(SaveSelectionRequest {
            message_index: 2,
            selected_text: "clip",
        })
        .unwrap();
        assert_eq!(save, json!({ "message_index": 2, "selected_text": "clip" }));
    }
}
