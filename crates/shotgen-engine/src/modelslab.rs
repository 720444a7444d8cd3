//! ModelsLab realtime image-to-image client.
//!
//! One generation is a single JSON POST. The response names the output image
//! in one of three shapes (see [`OutputRef`]), each resolved to raw bytes.

use std::env;
use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD as BASE64};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::error::{truncate_text, GenerationError};
use crate::provider::ImageProvider;

pub const DEFAULT_ENDPOINT: &str = "https://modelslab.com/api/v6/realtime/img2img";
pub const API_KEY_ENV: &str = "STABLE_DIFFUSION_API_KEY";
pub const ENDPOINT_ENV: &str = "MODELSLAB_API_URL";
pub const TIMEOUT_ENV: &str = "MODELSLAB_TIMEOUT_SECS";

const DEFAULT_NEGATIVE_PROMPT: &str = "bad quality";
const DEFAULT_STRENGTH: f64 = 0.7;
const DEFAULT_FAILURE_MESSAGE: &str = "Stable Diffusion API returned an error";
const INVALID_OUTPUT_MESSAGE: &str = "Output from API is missing or invalid";
const BASE64_FILE_SUFFIX: &str = ".base64";
const INLINE_MARKER: &str = "base64,";

/// Accepts unpadded input and non-zero trailing bits, like most lenient decoders.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Immutable settings for the generation endpoint, loaded once at startup.
#[derive(Clone)]
pub struct GenerationConfig {
    pub api_key: String,
    pub endpoint: String,
    pub negative_prompt: String,
    pub strength: f64,
    pub timeout: Option<Duration>,
}

impl GenerationConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            strength: DEFAULT_STRENGTH,
            timeout: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        let Some(api_key) = non_empty_env(API_KEY_ENV) else {
            bail!("{API_KEY_ENV} not set");
        };
        let mut config = Self::new(api_key);
        if let Some(endpoint) = non_empty_env(ENDPOINT_ENV) {
            config.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(raw) = non_empty_env(TIMEOUT_ENV) {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("{TIMEOUT_ENV} must be a whole number of seconds"))?;
            config.timeout = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("negative_prompt", &self.negative_prompt)
            .field("strength", &self.strength)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Shape of `output[0]` in a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRef<'a> {
    /// URL of a text file holding the base64-encoded image.
    FileReference(&'a str),
    /// URL of the image itself.
    DirectUrl(&'a str),
    /// Base64 payload carried in the response, already stripped of any
    /// data-URI header.
    Inline(&'a str),
}

impl<'a> OutputRef<'a> {
    /// Checked in order: `.base64` suffix, then `http` prefix, then inline.
    pub fn classify(raw: &'a str) -> Self {
        if raw.ends_with(BASE64_FILE_SUFFIX) {
            return Self::FileReference(raw);
        }
        if raw.starts_with("http") {
            return Self::DirectUrl(raw);
        }
        Self::Inline(inline_payload(raw))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileReference(_) => "file_reference",
            Self::DirectUrl(_) => "direct_url",
            Self::Inline(_) => "inline",
        }
    }
}

pub struct ModelsLabProvider {
    config: GenerationConfig,
    http: HttpClient,
}

impl ModelsLabProvider {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let mut builder = HttpClient::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("failed to build ModelsLab HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    fn request_generation(&self, image: &[u8], prompt: &str, size: u32) -> Result<Vec<u8>> {
        let payload = build_payload(&self.config, &BASE64.encode(image), prompt, size);
        let endpoint = &self.config.endpoint;

        let response = self
            .http
            .post(endpoint)
            .json(&payload)
            .send()
            .with_context(|| format!("ModelsLab request failed ({endpoint})"))?;
        let status = response.status();
        tracing::info!(status = status.as_u16(), "ModelsLab responded");

        let body = response
            .text()
            .context("ModelsLab response body read failed")?;
        let parsed: Value = serde_json::from_str(&body).with_context(|| {
            format!(
                "ModelsLab returned invalid JSON ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            )
        })?;

        let reference = OutputRef::classify(extract_output_ref(&parsed)?);
        tracing::info!(encoding = reference.kind(), "resolving generated image");
        self.resolve(reference)
    }

    fn resolve(&self, reference: OutputRef<'_>) -> Result<Vec<u8>> {
        match reference {
            OutputRef::FileReference(url) => {
                let text = self
                    .fetch(url)?
                    .text()
                    .with_context(|| format!("failed reading base64 file ({url})"))?;
                decode_base64_text(&text)
            }
            OutputRef::DirectUrl(url) => Ok(self
                .fetch(url)?
                .bytes()
                .with_context(|| format!("failed reading image bytes ({url})"))?
                .to_vec()),
            OutputRef::Inline(payload) => decode_base64_text(payload),
        }
    }

    fn fetch(&self, url: &str) -> Result<HttpResponse> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("failed downloading generated image ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "generated image download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        Ok(response)
    }
}

impl ImageProvider for ModelsLabProvider {
    fn name(&self) -> &str {
        "modelslab"
    }

    fn generate(&self, image: &[u8], prompt: &str, size: u32) -> Result<Vec<u8>, GenerationError> {
        self.request_generation(image, prompt, size).map_err(|err| {
            tracing::warn!(error = %format!("{err:#}"), "ModelsLab generation failed");
            GenerationError::from_chain(&err)
        })
    }
}

/// Request body for one img2img call. `seed`, `webhook` and `track_id` are
/// sent as explicit nulls.
pub fn build_payload(config: &GenerationConfig, image_b64: &str, prompt: &str, size: u32) -> Value {
    json!({
        "key": config.api_key,
        "prompt": prompt,
        "negative_prompt": config.negative_prompt,
        "init_image": image_b64,
        "base64": true,
        "width": size.to_string(),
        "height": size.to_string(),
        "samples": "1",
        "temp": false,
        "safety_checker": false,
        "strength": config.strength,
        "seed": Value::Null,
        "webhook": Value::Null,
        "track_id": Value::Null,
    })
}

/// First entry of `output`, after checking that the call succeeded.
pub fn extract_output_ref(response: &Value) -> Result<&str> {
    if response.get("status").and_then(Value::as_str) != Some("success") {
        let message = match response.get("message") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => DEFAULT_FAILURE_MESSAGE.to_string(),
            Some(other) => other.to_string(),
        };
        bail!("{message}");
    }
    response
        .get("output")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!(INVALID_OUTPUT_MESSAGE))
}

/// Strip whitespace, pad with `=` to a multiple of four and decode.
pub fn decode_base64_text(text: &str) -> Result<Vec<u8>> {
    let mut data: String = text.chars().filter(|ch| !ch.is_ascii_whitespace()).collect();
    while data.len() % 4 != 0 {
        data.push('=');
    }
    LENIENT_BASE64
        .decode(data.as_bytes())
        .context("generated image base64 decode failed")
}

fn inline_payload(raw: &str) -> &str {
    match raw.rfind(INLINE_MARKER) {
        Some(idx) => &raw[idx + INLINE_MARKER.len()..],
        None => raw,
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{
        build_payload, decode_base64_text, extract_output_ref, GenerationConfig,
        ModelsLabProvider, OutputRef,
    };
    use crate::provider::ImageProvider;

    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

    async fn generate_against(
        server: &MockServer,
        image: &'static [u8],
        prompt: &'static str,
    ) -> anyhow::Result<Vec<u8>> {
        let endpoint = format!("{}/img2img", server.uri());
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
            let provider =
                ModelsLabProvider::new(GenerationConfig::new("test-key").with_endpoint(endpoint))?;
            Ok(provider.generate(image, prompt, 512)?)
        })
        .await?
    }

    async fn mount_generation(server: &MockServer, body: Value) {
        Mock::given(method("POST"))
            .and(path("/img2img"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn classification_follows_priority_order() {
        assert_eq!(
            OutputRef::classify("https://cdn.example/out/1.base64"),
            OutputRef::FileReference("https://cdn.example/out/1.base64")
        );
        assert_eq!(
            OutputRef::classify("https://cdn.example/out/1.png"),
            OutputRef::DirectUrl("https://cdn.example/out/1.png")
        );
        assert_eq!(
            OutputRef::classify("data:image/png;base64,AAAA"),
            OutputRef::Inline("AAAA")
        );
        assert_eq!(OutputRef::classify("iVBORw0KGgo"), OutputRef::Inline("iVBORw0KGgo"));
        assert_eq!(
            OutputRef::classify("local/file.base64"),
            OutputRef::FileReference("local/file.base64")
        );
    }

    #[test]
    fn inline_payload_uses_last_marker() {
        assert_eq!(
            OutputRef::classify("data:text/base64,junk;base64,AAAA"),
            OutputRef::Inline("AAAA")
        );
    }

    #[test]
    fn data_uri_decodes_after_marker() -> anyhow::Result<()> {
        let OutputRef::Inline(payload) = OutputRef::classify("data:image/png;base64,AAAA") else {
            panic!("expected inline output");
        };
        assert_eq!(decode_base64_text(payload)?, vec![0, 0, 0]);
        Ok(())
    }

    #[test]
    fn unpadded_base64_is_padded_before_decode() -> anyhow::Result<()> {
        assert_eq!("iVBORw0KGgo".len() % 4, 3);
        assert_eq!(decode_base64_text("iVBORw0KGgo")?, PNG_SIGNATURE.to_vec());
        assert_eq!(decode_base64_text(" \n iVBORw0KGgo=\n")?, PNG_SIGNATURE.to_vec());
        Ok(())
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(decode_base64_text("not*base64!").is_err());
    }

    #[test]
    fn payload_carries_fixed_fields() {
        let payload = build_payload(&GenerationConfig::new("secret"), "QUJD", "studio shot", 768);
        assert_eq!(
            payload,
            json!({
                "key": "secret",
                "prompt": "studio shot",
                "negative_prompt": "bad quality",
                "init_image": "QUJD",
                "base64": true,
                "width": "768",
                "height": "768",
                "samples": "1",
                "temp": false,
                "safety_checker": false,
                "strength": 0.7,
                "seed": null,
                "webhook": null,
                "track_id": null,
            })
        );
        let object = payload.as_object().expect("payload object");
        for key in ["seed", "webhook", "track_id"] {
            assert_eq!(object.get(key), Some(&Value::Null));
        }
    }

    #[test]
    fn non_success_status_uses_service_message() {
        let err = extract_output_ref(&json!({"status": "error", "message": "Invalid API key"}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid API key");

        let err = extract_output_ref(&json!({"status": "processing"})).unwrap_err();
        assert_eq!(err.to_string(), "Stable Diffusion API returned an error");
    }

    #[test]
    fn output_must_be_a_non_empty_list() {
        for body in [
            json!({"status": "success"}),
            json!({"status": "success", "output": []}),
            json!({"status": "success", "output": "https://cdn.example/1.png"}),
            json!({"status": "success", "output": [42]}),
        ] {
            let err = extract_output_ref(&body).unwrap_err();
            assert_eq!(err.to_string(), "Output from API is missing or invalid");
        }
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let rendered = format!("{:?}", GenerationConfig::new("super-secret"));
        assert!(!rendered.contains("super-secret"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_reference_output_is_downloaded_and_decoded() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        let file_url = format!("{}/outputs/shot.base64", server.uri());
        mount_generation(&server, json!({"status": "success", "output": [file_url]})).await;
        Mock::given(method("GET"))
            .and(path("/outputs/shot.base64"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  iVBORw0KGgo\n"))
            .expect(1)
            .mount(&server)
            .await;

        let bytes = generate_against(&server, b"input-png", "on a beach").await?;
        assert_eq!(bytes, PNG_SIGNATURE.to_vec());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn direct_url_output_is_returned_unmodified() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        let image_url = format!("{}/outputs/shot.png", server.uri());
        let raw = vec![0u8, 1, 2, 253, 254, 255];
        mount_generation(&server, json!({"status": "success", "output": [image_url]})).await;
        Mock::given(method("GET"))
            .and(path("/outputs/shot.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(raw.clone()))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(generate_against(&server, b"input", "studio").await?, raw);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn inline_output_needs_no_download() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_generation(
            &server,
            json!({"status": "success", "output": ["data:image/png;base64,iVBORw0KGgo"]}),
        )
        .await;

        assert_eq!(
            generate_against(&server, b"input", "studio").await?,
            PNG_SIGNATURE.to_vec()
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn request_body_contains_encoded_image_and_prompt() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_generation(&server, json!({"status": "success", "output": ["AAAA"]})).await;

        generate_against(&server, b"ABC", "white background").await?;

        let requests = server.received_requests().await.unwrap_or_default();
        assert_eq!(requests.len(), 1);
        let body: Value = requests[0].body_json()?;
        assert_eq!(body["init_image"], json!("QUJD"));
        assert_eq!(body["prompt"], json!("white background"));
        assert_eq!(body["key"], json!("test-key"));
        assert_eq!(body["width"], json!("512"));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn error_status_surfaces_service_message() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        mount_generation(
            &server,
            json!({"status": "error", "message": "Invalid API key"}),
        )
        .await;

        let err = generate_against(&server, b"input", "studio").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid API key");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_json_is_a_generation_error() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/img2img"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = generate_against(&server, b"input", "studio").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("invalid JSON (502)"), "{message}");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_download_is_a_generation_error() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        let image_url = format!("{}/outputs/missing.png", server.uri());
        mount_generation(&server, json!({"status": "success", "output": [image_url]})).await;
        Mock::given(method("GET"))
            .and(path("/outputs/missing.png"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let err = generate_against(&server, b"input", "studio").await.unwrap_err();
        assert!(err.to_string().contains("download failed (404)"));
        Ok(())
    }
}
