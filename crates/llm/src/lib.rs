use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use mindful_config::{EmbeddingConfig, LlmConfig};

// ── Service seams ─────────────────────────────────────────────────────────────

/// Single-shot text completion: one system prompt, one user prompt, one reply.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Maps text to fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this backend returns.
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow!("embedding backend returned no vectors"))
    }
}

// ── Ollama ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    chat_model: String,
    embed_model: String,
    dimension: usize,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

impl OllamaClient {
    pub fn from_config(llm: &LlmConfig, embedding: &EmbeddingConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if llm.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(llm.request_timeout_secs));
        }
        let client = builder.build().context("building Ollama HTTP client")?;

        Ok(Self {
            client,
            base_url: llm.ollama_base_url.trim_end_matches('/').to_string(),
            chat_model: llm.chat_model.clone(),
            embed_model: embedding.model.clone(),
            dimension: embedding.dimension,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    /// Names of the models installed on the Ollama server, sorted.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let endpoint = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .with_context(|| format!("Ollama unavailable at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama error ({status}): {body}");
        }

        let tags: TagsResponse = response.json().await?;
        let mut models = tags
            .models
            .into_iter()
            .map(|entry| entry.name)
            .collect::<Vec<_>>();
        models.sort();
        models.dedup();
        Ok(models)
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    #[instrument(skip_all, fields(model = %self.chat_model, prompt_len = user_prompt.len()))]
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let payload = json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "stream": false
        });

        let response = self
            .client
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Ollama unavailable at {}; ensure model '{}' is installed",
                    self.base_url, self.chat_model
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama error ({status}): {body}");
        }

        let body: ChatResponse = response.json().await.context("decoding Ollama chat response")?;
        let content = body
            .message
            .map(|message| message.content)
            .ok_or_else(|| anyhow!("Ollama response missing message"))?;
        debug!(reply_len = content.len(), "chat completion received");
        Ok(content)
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[instrument(skip_all, fields(model = %self.embed_model, batch = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = format!("{}/api/embed", self.base_url);
        let payload = json!({
            "model": self.embed_model,
            "input": texts,
        });

        let response = self
            .client
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Ollama embeddings unavailable at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama embedding error ({status}): {body}");
        }

        let body: EmbedResponse = response
            .json()
            .await
            .context("decoding Ollama embedding response")?;

        if body.embeddings.len() != texts.len() {
            bail!(
                "Ollama returned {} embeddings for {} inputs",
                body.embeddings.len(),
                texts.len()
            );
        }
        if let Some(bad) = body.embeddings.iter().find(|v| v.len() != self.dimension) {
            bail!(
                "embedding model '{}' returned {} dimensions, expected {}",
                self.embed_model,
                bad.len(),
                self.dimension
            );
        }

        Ok(body.embeddings)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer, dimension: usize) -> OllamaClient {
        let llm = LlmConfig {
            ollama_base_url: format!("{}/", server.base_url()),
            chat_model: "echo-care".to_string(),
            ..Default::default()
        };
        let embedding = EmbeddingConfig {
            model: "nomic-embed-text".to_string(),
            dimension,
        };
        OllamaClient::from_config(&llm, &embedding).unwrap()
    }

    #[tokio::test]
    async fn complete_sends_system_and_user_messages() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat").json_body_includes(
                json!({
                    "model": "echo-care",
                    "stream": false,
                    "messages": [
                        {"role": "system", "content": "persona"},
                        {"role": "user", "content": "User: hi\nChatbot:"}
                    ]
                })
                .to_string(),
            );
            then.status(200).json_body(json!({
                "model": "echo-care",
                "message": {"role": "assistant", "content": "Hello there."},
                "done": true
            }));
        });

        let client = client_for(&server, 3);
        let reply = client.complete("persona", "User: hi\nChatbot:").await.unwrap();

        mock.assert();
        assert_eq!(reply, "Hello there.");
    }

    #[tokio::test]
    async fn complete_surfaces_http_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(404).body("model 'echo-care' not found");
        });

        let client = client_for(&server, 3);
        let err = client.complete("persona", "hi").await.unwrap_err();
        assert!(err.to_string().contains("404"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn complete_rejects_missing_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(200).json_body(json!({"done": true}));
        });

        let client = client_for(&server, 3);
        assert!(client.complete("persona", "hi").await.is_err());
    }

    #[tokio::test]
    async fn embed_batch_returns_one_vector_per_input() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/embed").json_body_includes(
                json!({"model": "nomic-embed-text", "input": ["a", "b"]}).to_string(),
            );
            then.status(200).json_body(json!({
                "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
            }));
        });

        let client = client_for(&server, 3);
        let vectors = client
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        mock.assert();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.4, 0.5, 0.6]);
    }

    #[tokio::test]
    async fn embed_uses_single_input_batch() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(200).json_body(json!({"embeddings": [[1.0, 0.0]]}));
        });

        let client = client_for(&server, 2);
        assert_eq!(client.embed("hello").await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn embed_rejects_wrong_dimension() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(200).json_body(json!({"embeddings": [[1.0, 0.0]]}));
        });

        let client = client_for(&server, 768);
        let err = client.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("expected 768"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn embed_batch_of_nothing_skips_the_network() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(500);
        });

        let client = client_for(&server, 3);
        assert!(client.embed_batch(&[]).await.unwrap().is_empty());
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn list_models_sorts_and_dedups() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200).json_body(json!({
                "models": [
                    {"name": "nomic-embed-text:latest"},
                    {"name": "echo-care:latest"},
                    {"name": "echo-care:latest"}
                ]
            }));
        });

        let client = client_for(&server, 3);
        assert_eq!(
            client.list_models().await.unwrap(),
            vec!["echo-care:latest", "nomic-embed-text:latest"]
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let llm = LlmConfig {
            ollama_base_url: "http://localhost:11434///".to_string(),
            ..Default::default()
        };
        let client = OllamaClient::from_config(&llm, &EmbeddingConfig::default()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.chat_model(), "echo-care");
        assert_eq!(client.dimension(), 768);
    }
}
