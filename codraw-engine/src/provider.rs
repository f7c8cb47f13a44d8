//! Remote classify/generate and workspace-analysis provider.
//!
//! The provider decides whether a request needs a drawing at all and, if so,
//! returns the generated image. [`HttpProvider`] talks to two JSON endpoints:
//!
//! ```text
//! POST {base}/co-draw            CoDrawRequest       -> CoDrawResponse
//! POST {base}/analyze-workspace  WorkspaceAnalysis   -> { "analysis": "..." }
//! ```

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// Largest error body kept in [`ProviderError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Where a generation request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestSource {
    /// Activity debouncer settled.
    Auto,
    /// Voice tool call.
    Voice,
    /// Explicit chat prompt.
    Chat,
}

impl std::fmt::Display for RequestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Voice => write!(f, "voice"),
            Self::Chat => write!(f, "chat"),
        }
    }
}

/// One classify-and-generate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoDrawRequest {
    /// JPEG data URI of the viewport, absent for a blank canvas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    /// User prompt or voice instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Extra images supplied by the user (data URIs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_images: Vec<String>,
    /// Request origin.
    pub source: RequestSource,
    /// Names of existing layers, so the provider can target one.
    #[serde(default)]
    pub layers: Vec<String>,
}

/// Answer of a classify-and-generate call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CoDrawResponse {
    /// No drawing needed; just a reply.
    Respond {
        /// Reply text.
        message: String,
    },
    /// A drawing was requested.
    Draw {
        /// Classifier reply text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Layer name or id the drawing belongs to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_layer: Option<String>,
        /// Generated image as a data URI or bare base64.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
        /// Text produced alongside the image.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_text: Option<String>,
    },
}

impl CoDrawResponse {
    /// Text to show the user: the classifier message first, then the
    /// generator's text. Blank strings count as absent.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        let non_blank = |s: &&str| !s.trim().is_empty();
        match self {
            Self::Respond { message } => Some(message.as_str()).filter(non_blank),
            Self::Draw {
                message,
                image_text,
                ..
            } => message
                .as_deref()
                .filter(non_blank)
                .or_else(|| image_text.as_deref().filter(non_blank)),
        }
    }
}

/// Request for a free-text description of the canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceAnalysisRequest {
    /// PNG data URI of the full canvas, absent when blank.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// What to pay attention to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkspaceAnalysisResponse {
    analysis: String,
}

/// Remote AI collaborator.
#[async_trait]
pub trait CoDrawProvider: Send + Sync {
    /// Classify the request and, when drawing is needed, generate an image.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the call fails or the answer is malformed.
    async fn co_draw(&self, request: CoDrawRequest) -> Result<CoDrawResponse, ProviderError>;

    /// Describe the canvas.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the call fails or the answer is malformed.
    async fn analyze_workspace(
        &self,
        request: WorkspaceAnalysisRequest,
    ) -> Result<String, ProviderError>;
}

/// [`CoDrawProvider`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    http: Client,
    base: Url,
    api_key: Option<String>,
}

impl HttpProvider {
    /// Create a provider for `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidUrl`] if the URL is malformed and
    /// [`ProviderError::Http`] if the HTTP client fails to build.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let mut base =
            Url::parse(&config.base_url).map_err(|e| ProviderError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ProviderError::InvalidUrl(config.base_url.clone()));
        }
        // Relative joins replace the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .user_agent(concat!("codraw/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base,
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url, ProviderError> {
        self.base
            .join(name)
            .map_err(|e| ProviderError::InvalidUrl(e.to_string()))
    }

    async fn post<B: Serialize + Sync>(&self, name: &str, body: &B) -> Result<Response, ProviderError> {
        let mut request = self.http.post(self.endpoint(name)?).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
            tracing::warn!(endpoint = name, status = status.as_u16(), "Provider request failed");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl CoDrawProvider for HttpProvider {
    async fn co_draw(&self, request: CoDrawRequest) -> Result<CoDrawResponse, ProviderError> {
        tracing::debug!(
            source = %request.source,
            has_snapshot = request.snapshot.is_some(),
            references = request.reference_images.len(),
            "Sending co-draw request"
        );
        let response = self.post("co-draw", &request).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn analyze_workspace(
        &self,
        request: WorkspaceAnalysisRequest,
    ) -> Result<String, ProviderError> {
        let response = self.post("analyze-workspace", &request).await?;
        let bytes = response.bytes().await?;
        let parsed: WorkspaceAnalysisResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(parsed.analysis)
    }
}

fn truncate_at_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}
