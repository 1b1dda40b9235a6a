//! Gemini API backends.
//!
//! Two long-running job families share one HTTP client:
//!
//! - **Video** (Veo): `models/{model}:predictLongRunning` returns an
//!   operation whose `name` is polled until `done`.
//! - **Research** (Deep Research agent): `interactions` with
//!   `background: true` returns an interaction `id` polled until its
//!   `status` is terminal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use vigilconf::RemoteConfig;

use crate::domain::{JobKind, RemoteHandle, RemoteResult};
use crate::error::RemoteError;
use crate::remote::{
    FetchedArtifact, JobBackend, JobRequest, ProbeReport, ResearchRequest, StartedJob,
    VideoRequest,
};
use crate::telemetry;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Redirect hops followed when downloading an artifact.
const MAX_REDIRECTS: usize = 10;

/// Shared HTTP plumbing: base URL, key header, timeout, trace propagation.
///
/// Redirects are followed by hand so the API key only ever goes to the
/// API's own origin.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    base: reqwest::Url,
    api_key: String,
}

impl GeminiClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let base = reqwest::Url::parse(&base_url)
            .with_context(|| format!("Invalid API base URL {}", base_url))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            base,
            api_key: api_key.into(),
        })
    }

    /// Build from config, reading the API key from the configured env var.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let api_key = config.api_key().with_context(|| {
            format!("API key not set; export {} first", config.api_key_env)
        })?;
        Self::new(
            &config.base_url,
            api_key,
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Whether requests to `url` may carry the API key.
    fn trusts(&self, url: &reqwest::Url) -> bool {
        url.origin() == self.base.origin()
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.traced(self.http.request(method, url).header(API_KEY_HEADER, &self.api_key))
    }

    fn traced(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(tp) = telemetry::current_traceparent() {
            builder = builder.header("traceparent", tp);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let response = builder.send().await?;
        check_status(response).await
    }

    #[tracing::instrument(name = "gemini.post", skip(self, body), fields(http.path = %path))]
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, RemoteError> {
        let builder = self.request(reqwest::Method::POST, &self.url(path)).json(body);
        Ok(self.send(builder).await?.json().await?)
    }

    #[tracing::instrument(name = "gemini.get", skip(self), fields(http.path = %path))]
    async fn get_json(&self, path: &str) -> Result<Value, RemoteError> {
        let builder = self.request(reqwest::Method::GET, &self.url(path));
        Ok(self.send(builder).await?.json().await?)
    }

    /// Download a file URI handed out by the API, following redirects. The
    /// key is dropped on any hop that leaves the API origin.
    #[tracing::instrument(name = "gemini.download", skip(self))]
    async fn download(&self, uri: &str) -> Result<Vec<u8>, RemoteError> {
        let mut url = reqwest::Url::parse(uri)
            .map_err(|e| RemoteError::Malformed(format!("bad file URI {}: {}", uri, e)))?;

        for _ in 0..=MAX_REDIRECTS {
            let mut builder = self.http.get(url.clone());
            if self.trusts(&url) {
                builder = builder.header(API_KEY_HEADER, &self.api_key);
            }
            let response = self.traced(builder).send().await?;

            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        RemoteError::Malformed(format!("redirect from {} has no location", url))
                    })?;
                url = url.join(location).map_err(|e| {
                    RemoteError::Malformed(format!("bad redirect target {}: {}", location, e))
                })?;
                tracing::debug!(http.redirect = %url, key_sent = self.trusts(&url), "Following redirect");
                continue;
            }

            let bytes = check_status(response).await?.bytes().await?;
            return Ok(bytes.to_vec());
        }

        Err(RemoteError::Malformed(format!(
            "more than {} redirects downloading {}",
            MAX_REDIRECTS, uri
        )))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(http.status = status.as_u16(), body = %body, "Remote API error");
        return Err(RemoteError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

fn string_field(value: &Value, field: &str, what: &str) -> Result<String, RemoteError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RemoteError::Malformed(format!("{} has no `{}`", what, field)))
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

fn wrong_kind(expected: JobKind, request: &JobRequest) -> RemoteError {
    RemoteError::Malformed(format!(
        "{} backend cannot start a {} job",
        expected,
        request.kind()
    ))
}

// --- Video ---

/// Veo video rendering via long-running operations.
pub struct VideoBackend {
    client: Arc<GeminiClient>,
    model: String,
}

impl VideoBackend {
    pub fn new(client: Arc<GeminiClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

fn video_body(request: &VideoRequest) -> Value {
    let mut parameters = json!({
        "aspectRatio": request.aspect_ratio.as_deref().unwrap_or("16:9"),
    });
    if let Some(resolution) = &request.resolution {
        parameters["resolution"] = json!(resolution);
    }
    if let Some(negative) = &request.negative_prompt {
        parameters["negativePrompt"] = json!(negative);
    }
    if let Some(seconds) = request.duration_seconds {
        parameters["durationSeconds"] = json!(seconds);
    }

    json!({
        "instances": [{ "prompt": request.prompt }],
        "parameters": parameters,
    })
}

/// Interpret a long-running operation. A missing `done` means still running.
fn parse_operation(operation: &Value) -> ProbeReport {
    if !operation.get("done").and_then(Value::as_bool).unwrap_or(false) {
        return ProbeReport::running();
    }
    if let Some(error) = operation.get("error") {
        return ProbeReport::failed(error_message(error));
    }
    ProbeReport::succeeded(operation.get("response").cloned().map(RemoteResult::new))
}

enum VideoSource {
    Uri(String),
    Inline(String),
}

fn video_source(response: &Value) -> Option<VideoSource> {
    let video = response
        .pointer("/generateVideoResponse/generatedSamples/0/video")
        .or_else(|| response.pointer("/generatedSamples/0/video"))?;

    if let Some(uri) = video.get("uri").and_then(Value::as_str) {
        return Some(VideoSource::Uri(uri.to_string()));
    }
    video
        .get("bytesBase64Encoded")
        .and_then(Value::as_str)
        .map(|b| VideoSource::Inline(b.to_string()))
}

#[async_trait]
impl JobBackend for VideoBackend {
    fn kind(&self) -> JobKind {
        JobKind::Video
    }

    async fn start(&self, request: &JobRequest) -> Result<StartedJob, RemoteError> {
        let JobRequest::Video(video) = request else {
            return Err(wrong_kind(JobKind::Video, request));
        };

        let path = format!("models/{}:predictLongRunning", self.model);
        let operation = self.client.post_json(&path, &video_body(video)).await?;
        let name = string_field(&operation, "name", "operation")?;

        Ok(StartedJob {
            handle: RemoteHandle::new(json!({ "name": name })),
            remote_id: Some(name),
        })
    }

    async fn probe(&self, handle: &RemoteHandle) -> Result<ProbeReport, RemoteError> {
        let name = string_field(handle.as_value(), "name", "video handle")?;
        let operation = self.client.get_json(&name).await?;
        Ok(parse_operation(&operation))
    }

    async fn fetch(&self, result: &RemoteResult) -> Result<Option<FetchedArtifact>, RemoteError> {
        let bytes = match video_source(result.as_value()) {
            Some(VideoSource::Uri(uri)) => self.client.download(&uri).await?,
            Some(VideoSource::Inline(encoded)) => {
                base64::engine::general_purpose::STANDARD.decode(encoded)?
            }
            None => return Ok(None),
        };

        Ok(Some(FetchedArtifact {
            bytes,
            extension: "mp4".to_string(),
        }))
    }
}

// --- Research ---

/// Deep Research agent via background interactions.
pub struct ResearchBackend {
    client: Arc<GeminiClient>,
    agent: String,
}

impl ResearchBackend {
    pub fn new(client: Arc<GeminiClient>, agent: impl Into<String>) -> Self {
        Self {
            client,
            agent: agent.into(),
        }
    }
}

fn research_input(request: &ResearchRequest) -> String {
    match request.format.as_deref().map(str::trim) {
        Some(format) if !format.is_empty() => format!(
            "{}\n\nFormat the final report as follows:\n{}",
            request.prompt, format
        ),
        _ => request.prompt.clone(),
    }
}

/// Interpret an interaction. Only `completed`, `failed` and `cancelled`
/// are terminal.
fn parse_interaction(interaction: &Value) -> ProbeReport {
    let status = interaction
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match status {
        "completed" => ProbeReport::succeeded(Some(RemoteResult::new(interaction.clone()))),
        "failed" | "cancelled" => ProbeReport::failed(
            interaction
                .get("error")
                .map(error_message)
                .unwrap_or_else(|| status.to_string()),
        ),
        _ => ProbeReport::running(),
    }
}

fn research_text(interaction: &Value) -> Option<String> {
    let texts: Vec<&str> = interaction
        .get("outputs")?
        .as_array()?
        .iter()
        .filter_map(|output| output.get("text").and_then(Value::as_str))
        .filter(|text| !text.trim().is_empty())
        .collect();

    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n\n"))
    }
}

#[async_trait]
impl JobBackend for ResearchBackend {
    fn kind(&self) -> JobKind {
        JobKind::Research
    }

    async fn start(&self, request: &JobRequest) -> Result<StartedJob, RemoteError> {
        let JobRequest::Research(research) = request else {
            return Err(wrong_kind(JobKind::Research, request));
        };

        let body = json!({
            "input": research_input(research),
            "agent": self.agent,
            "background": true,
        });
        let interaction = self.client.post_json("interactions", &body).await?;
        let id = string_field(&interaction, "id", "interaction")?;

        Ok(StartedJob {
            handle: RemoteHandle::new(json!({ "id": id })),
            remote_id: Some(id),
        })
    }

    async fn probe(&self, handle: &RemoteHandle) -> Result<ProbeReport, RemoteError> {
        let id = string_field(handle.as_value(), "id", "research handle")?;
        let interaction = self.client.get_json(&format!("interactions/{}", id)).await?;
        Ok(parse_interaction(&interaction))
    }

    async fn fetch(&self, result: &RemoteResult) -> Result<Option<FetchedArtifact>, RemoteError> {
        Ok(research_text(result.as_value()).map(|text| FetchedArtifact {
            bytes: text.into_bytes(),
            extension: "md".to_string(),
        }))
    }
}
