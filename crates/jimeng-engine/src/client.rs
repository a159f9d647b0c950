use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::truncate_text;

pub const DEFAULT_MODEL: &str = "jimeng-2.1";
pub const DEFAULT_WIDTH: u32 = 1024;
pub const DEFAULT_HEIGHT: u32 = 1024;
pub const DEFAULT_SAMPLE_STRENGTH: f64 = 0.5;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const ERROR_BODY_MAX_CHARS: usize = 512;

/// Source of generated images. The plugin talks to this seam so it can be
/// driven by a stub in tests.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    /// Image URLs for `prompt`, in API order.
    fn generate_image(&self, prompt: &str) -> Result<Vec<String>>;
    fn download_image(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationPayload {
    pub model: String,
    pub prompt: String,
    #[serde(rename = "negativePrompt")]
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub sample_strength: f64,
}

impl GenerationPayload {
    pub fn new(prompt: &str) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            prompt: prompt.to_string(),
            negative_prompt: String::new(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            sample_strength: DEFAULT_SAMPLE_STRENGTH,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Option<Vec<GeneratedImage>>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: String,
}

/// Blocking client for the Jimeng image generation endpoint.
pub struct JimengClient {
    api_url: String,
    auth_token: String,
    max_images: usize,
    http: HttpClient,
}

impl JimengClient {
    pub fn new(api_url: &str, auth_token: &str, max_images: usize) -> Result<Self> {
        Self::with_timeout(api_url, auth_token, max_images, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        api_url: &str,
        auth_token: &str,
        max_images: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_url: api_url.trim().to_string(),
            auth_token: auth_token.to_string(),
            max_images: max_images.max(1),
            http,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    fn post_json(&self, payload: &GenerationPayload) -> Result<Value> {
        let response = self
            .http
            .post(&self.api_url)
            .header(AUTHORIZATION, format!("Bearer {}", self.auth_token))
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
            .send()
            .with_context(|| format!("API request failed: POST {}", self.api_url))?;
        response_json_or_error("Jimeng", response)
    }
}

impl ImageProvider for JimengClient {
    fn name(&self) -> &str {
        "jimeng"
    }

    fn generate_image(&self, prompt: &str) -> Result<Vec<String>> {
        let payload = GenerationPayload::new(prompt);
        let response = self.post_json(&payload).inspect_err(|err| {
            tracing::error!(target: "jimeng", "image API request failed: {err:#}");
        })?;
        let urls = extract_image_urls(response, self.max_images)?;
        tracing::debug!(target: "jimeng", count = urls.len(), "image API returned urls");
        Ok(urls)
    }

    fn download_image(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("image download failed: GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("image download failed ({}): {url}", status.as_u16());
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("image download body read failed: {url}"))?;
        Ok(bytes.to_vec())
    }
}

/// Keeps the first `max_images` URLs of a generation response.
fn extract_image_urls(response: Value, max_images: usize) -> Result<Vec<String>> {
    let parsed: GenerationResponse =
        serde_json::from_value(response).context("API returned malformed data")?;
    let data = parsed.data.unwrap_or_default();
    if data.is_empty() {
        bail!("API returned malformed data: no images in response");
    }
    Ok(data
        .into_iter()
        .take(max_images)
        .map(|item| item.url)
        .collect())
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, ERROR_BODY_MAX_CHARS)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}
