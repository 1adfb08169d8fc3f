//! HTTP transport for a Gemini-style REST API.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::request::{EmbedRequest, EmbedTask, GenerateReply, GenerateRequest, Message, Role};
use crate::transport::{Transport, TransportError};

/// Create a shared HTTP client with standard configuration.
///
/// Config: 10s connect timeout, rustls TLS, `sibyl/{version}` user-agent.
/// Per-request timeouts are the gateway's job, so none is set here.
#[must_use]
pub fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("sibyl/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .expect("default HTTP client construction must not fail")
}

/// [`Transport`] over `models/{model}:generateContent` and
/// `models/{model}:embedContent`. The key travels in a header, never in
/// the URL, so it cannot leak through request logs.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpTransport {
    #[must_use]
    pub fn new(mut base_url: String) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: default_client(),
            base_url,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn post_json<B: Serialize>(
        &self,
        key: &str,
        url: String,
        body: &B,
    ) -> Result<String, TransportError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(TransportError::Network)?;
        match status {
            200..=299 => Ok(text),
            429 => Err(TransportError::RateLimited),
            401 | 403 => Err(TransportError::InvalidKey { status }),
            400..=499 => Err(TransportError::BadRequest {
                message: truncate(&text, 512),
            }),
            _ => Err(TransportError::Overloaded { status }),
        }
    }
}

impl Transport for HttpTransport {
    async fn generate(
        &self,
        key: &str,
        request: &GenerateRequest,
    ) -> Result<GenerateReply, TransportError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, request.model
        );
        let body = GenerateBody::from(request);
        let text = self.post_json(key, url, &body).await?;
        let resp: GenerateResponse = serde_json::from_str(&text)?;

        if resp
            .prompt_feedback
            .as_ref()
            .is_some_and(|f| f.block_reason.is_some())
        {
            return Ok(GenerateReply::safety_blocked());
        }
        let Some(candidate) = resp.candidates.first() else {
            return Err(TransportError::EmptyResponse);
        };
        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Ok(GenerateReply::safety_blocked());
        }
        let text: String = candidate
            .content
            .as_ref()
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(TransportError::EmptyResponse);
        }
        Ok(GenerateReply::text(text))
    }

    async fn embed(&self, key: &str, request: &EmbedRequest) -> Result<Vec<f32>, TransportError> {
        let url = format!(
            "{}/v1beta/models/{}:embedContent",
            self.base_url, request.model
        );
        let body = EmbedBody {
            content: ContentBody {
                role: None,
                parts: vec![PartBody {
                    text: &request.text,
                }],
            },
            task_type: request.task.as_api_str(),
            title: match request.task {
                EmbedTask::RetrievalDocument => request.title.as_deref(),
                _ => None,
            },
        };
        let text = self.post_json(key, url, &body).await?;
        let resp: EmbedResponse = serde_json::from_str(&text)?;
        if resp.embedding.values.is_empty() {
            return Err(TransportError::EmptyResponse);
        }
        Ok(resp.embedding.values)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_owned()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_owned()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ContentBody<'a>>,
    contents: Vec<ContentBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl<'a> From<&'a GenerateRequest> for GenerateBody<'a> {
    fn from(request: &'a GenerateRequest) -> Self {
        let contents = request.messages.iter().map(ContentBody::from).collect();
        let generation_config = if request.temperature.is_none()
            && request.max_output_tokens.is_none()
        {
            None
        } else {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            })
        };
        Self {
            system_instruction: request.system.as_deref().map(|text| ContentBody {
                role: None,
                parts: vec![PartBody { text }],
            }),
            contents,
            generation_config,
        }
    }
}

#[derive(Serialize)]
struct ContentBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<PartBody<'a>>,
}

impl<'a> From<&'a Message> for ContentBody<'a> {
    fn from(message: &'a Message) -> Self {
        let role = match message.role {
            Role::User => "user",
            Role::Model => "model",
        };
        Self {
            role: Some(role),
            parts: vec![PartBody {
                text: &message.content,
            }],
        }
    }
}

#[derive(Serialize)]
struct PartBody<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedBody<'a> {
    content: ContentBody<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}
