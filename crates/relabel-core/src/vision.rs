//! Chat-completion client that asks a vision model to describe an image.
//!
//! One blocking POST per image: no retry, no batching. A response without
//! `choices` is reported as `Ok(None)` so the caller can skip the file.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_DETAIL: &str = "high";

/// Configuration for the vision endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Chat-completion URL
    pub endpoint: String,
    /// Model name sent in the request body
    pub model: String,
    /// Image detail hint ("high" or "low")
    pub detail: String,
    /// Prompt override; the mode's built-in prompt is used when None
    pub prompt: Option<String>,
    /// Token budget override; the mode's budget is used when None
    pub max_tokens: Option<u32>,
    /// Request timeout, None waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            detail: DEFAULT_DETAIL.to_string(),
            prompt: None,
            max_tokens: None,
            timeout: None,
        }
    }
}

impl VisionConfig {
    /// Create a new config with the given model name.
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the chat-completion endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the prompt sent with every image.
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Override the token budget.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Something that can turn an image into a short text description.
pub trait Labeler {
    /// Describe the image at `image_path`.
    ///
    /// Returns `Ok(None)` when the service answered without any choices.
    fn describe(
        &self,
        image_path: &Path,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<Option<String>, VisionError>;
}

/// Blocking HTTP client for an OpenAI-compatible chat-completion endpoint.
pub struct VisionClient {
    http: Client,
    config: VisionConfig,
    api_key: String,
}

impl VisionClient {
    pub fn new(config: VisionConfig, api_key: impl Into<String>) -> Result<Self, VisionError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VisionError::Connection(config.endpoint.clone(), e.to_string()))?;
        Ok(Self {
            http,
            config,
            api_key: api_key.into(),
        })
    }

    pub fn config(&self) -> &VisionConfig {
        &self.config
    }

    /// Send one already-encoded image and return the parsed JSON response.
    pub fn send(&self, image_b64: &str, prompt: &str, max_tokens: u32) -> Result<Value, VisionError> {
        let body = build_request_body(&self.config, prompt, image_b64, max_tokens);

        let resp = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| VisionError::Connection(self.config.endpoint.clone(), e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            // Error bodies still go through the choices check below
            tracing::warn!(status = status.as_u16(), "vision endpoint returned an error status");
        }

        resp.json::<Value>()
            .map_err(|e| VisionError::InvalidResponse(e.to_string()))
    }
}

impl Labeler for VisionClient {
    fn describe(
        &self,
        image_path: &Path,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<Option<String>, VisionError> {
        let image_b64 = encode_image(image_path)?;
        let response = self.send(&image_b64, prompt, max_tokens)?;
        extract_content(&response)
    }
}

/// Build the chat-completion request body for one image.
pub fn build_request_body(
    config: &VisionConfig,
    prompt: &str,
    image_b64: &str,
    max_tokens: u32,
) -> Value {
    json!({
        "model": config.model,
        "messages": [
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:image/jpeg;base64,{}", image_b64),
                            "detail": config.detail,
                        }
                    }
                ]
            }
        ],
        "max_tokens": max_tokens,
    })
}

/// Pull the first choice's message text out of a response.
///
/// A missing or empty `choices` array yields `Ok(None)`. A choice without a
/// string `message.content` is a malformed response.
pub fn extract_content(response: &Value) -> Result<Option<String>, VisionError> {
    let Some(first) = response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    else {
        return Ok(None);
    };

    let content = first
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            VisionError::InvalidResponse("first choice has no message.content".to_string())
        })?;

    Ok(Some(content.trim().to_string()))
}

/// Read a file and encode it as standard base64.
pub fn encode_image(path: &Path) -> Result<String, VisionError> {
    let bytes = std::fs::read(path)
        .map_err(|e| VisionError::ImageRead(format!("{}: {}", path.display(), e)))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Errors that can occur while asking for a description.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Cannot connect to {0}: {1}")]
    Connection(String, String),

    #[error("Invalid response from vision endpoint: {0}")]
    InvalidResponse(String),

    #[error("Failed to read image: {0}")]
    ImageRead(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_request_body_shape() {
        let config = VisionConfig::default();
        let body = build_request_body(&config, "label it", "QUJD", 15);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 15);
        let msg = &body["messages"][0];
        assert_eq!(msg["role"], "user");
        assert_eq!(msg["content"][0]["type"], "text");
        assert_eq!(msg["content"][0]["text"], "label it");
        assert_eq!(msg["content"][1]["type"], "image_url");
        assert_eq!(
            msg["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,QUJD"
        );
        assert_eq!(msg["content"][1]["image_url"]["detail"], "high");
    }

    #[test]
    fn test_extract_content() {
        let resp = json!({
            "choices": [ { "message": { "role": "assistant", "content": "  Red Apple \n" } } ]
        });
        assert_eq!(extract_content(&resp).unwrap(), Some("Red Apple".to_string()));
    }

    #[test]
    fn test_extract_content_empty_choices() {
        assert_eq!(extract_content(&json!({ "choices": [] })).unwrap(), None);
        assert_eq!(
            extract_content(&json!({ "error": { "message": "bad key" } })).unwrap(),
            None
        );
    }

    #[test]
    fn test_extract_content_malformed_choice() {
        let resp = json!({ "choices": [ { "message": { "content": null } } ] });
        assert!(matches!(
            extract_content(&resp),
            Err(VisionError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_encode_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"ABC").unwrap();
        assert_eq!(encode_image(&path).unwrap(), "QUJD");
        assert!(matches!(
            encode_image(&dir.path().join("missing.png")),
            Err(VisionError::ImageRead(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = VisionConfig::with_model("gpt-4o-mini")
            .endpoint("http://localhost:8080/v1/chat/completions")
            .timeout(Some(Duration::from_secs(30)))
            .max_tokens(20);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.max_tokens, Some(20));
        assert_eq!(config.detail, DEFAULT_DETAIL);
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: VisionConfig = serde_json::from_str(r#"{ "model": "llava" }"#).unwrap();
        assert_eq!(config.model, "llava");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.detail, DEFAULT_DETAIL);
        assert_eq!(config.prompt, None);
        assert_eq!(config.timeout, None);
    }

    fn client_for(server: &mockito::Server) -> VisionClient {
        let config = VisionConfig::default()
            .endpoint(format!("{}/v1/chat/completions", server.url()))
            .timeout(Some(Duration::from_secs(10)));
        VisionClient::new(config, "sk-test").unwrap()
    }

    fn abc_image(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("a.png");
        std::fs::write(&path, b"ABC").unwrap();
        path
    }

    #[test]
    fn test_describe_sends_bearer_and_body() {
        let mut server = mockito::Server::new();
        let expected = build_request_body(&VisionConfig::default(), "label it", "QUJD", 15);
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(expected))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Red Apple"}}]}"#)
            .create();

        let dir = tempdir().unwrap();
        let client = client_for(&server);
        let label = client.describe(&abc_image(dir.path()), "label it", 15).unwrap();
        assert_eq!(label, Some("Red Apple".to_string()));
        mock.assert();
    }

    #[test]
    fn test_describe_error_status_with_json_skips() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#)
            .create();

        let dir = tempdir().unwrap();
        let client = client_for(&server);
        let label = client.describe(&abc_image(dir.path()), "label it", 15).unwrap();
        assert_eq!(label, None);
    }

    #[test]
    fn test_describe_non_json_body_is_invalid() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_header("content-type", "text/plain")
            .with_body("Internal Server Error")
            .create();

        let dir = tempdir().unwrap();
        let client = client_for(&server);
        let result = client.describe(&abc_image(dir.path()), "label it", 15);
        assert!(matches!(result, Err(VisionError::InvalidResponse(_))));
    }

    #[test]
    fn test_describe_trims_content() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"  Red Apple \n"}}]}"#)
            .create();

        let dir = tempdir().unwrap();
        let client = client_for(&server);
        let label = client.describe(&abc_image(dir.path()), "label it", 50).unwrap();
        assert_eq!(label, Some("Red Apple".to_string()));
    }
}
