//! Functions the voice model can call.
//!
//! - `analyze_workspace` - describe the canvas
//! - `draw_on_canvas` - run the generation pipeline on the model's instructions

use serde::{Deserialize, Serialize};

use codraw_renderer::{RasterFormat, SnapshotRequest};

use super::protocol::ToolDefinition;
use crate::error::ToolError;
use crate::provider::WorkspaceAnalysisRequest;
use crate::solver::{GenerationOutcome, GenerationRequest, Solver};

/// Name of the canvas description tool.
pub const ANALYZE_WORKSPACE: &str = "analyze_workspace";
/// Name of the drawing tool.
pub const DRAW_ON_CANVAS: &str = "draw_on_canvas";

/// Result returned to the model for every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Result data (if successful).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    /// Create a success response.
    #[must_use]
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// JSON value sent as the function-call output.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "success": self.success }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeArgs {
    #[serde(default)]
    focus: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DrawArgs {
    #[serde(default)]
    instructions: Option<String>,
}

/// Definitions declared in the session handshake.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            ANALYZE_WORKSPACE,
            "Look at the whole canvas and describe what is drawn on it",
            analyze_schema(),
        ),
        ToolDefinition::function(
            DRAW_ON_CANVAS,
            "Draw on the canvas. The drawing is staged for the user to accept or reject",
            draw_schema(),
        ),
    ]
}

fn analyze_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "focus": {
                "type": "string",
                "description": "What to pay attention to, e.g. 'the colors' or 'the house'"
            }
        }
    })
}

fn draw_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "instructions": {
                "type": "string",
                "description": "What to draw and where, in plain language"
            }
        }
    })
}

/// Parse an arguments string. Blank input means no arguments.
fn parse_args<T>(arguments: &str) -> Result<T, ToolError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if arguments.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Tool implementations bound to a solver.
#[derive(Debug, Clone)]
pub struct VoiceTools {
    solver: Solver,
    analysis_max_dimension: u32,
}

impl VoiceTools {
    /// Bind the tools to `solver`.
    #[must_use]
    pub fn new(solver: Solver, analysis_max_dimension: u32) -> Self {
        Self {
            solver,
            analysis_max_dimension,
        }
    }

    /// Run the named tool with a JSON arguments string.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] for unregistered names,
    /// [`ToolError::InvalidArguments`] for malformed arguments and
    /// [`ToolError::Failed`] when the tool itself fails.
    pub async fn dispatch(&self, name: &str, arguments: &str) -> Result<ToolResponse, ToolError> {
        tracing::info!(tool = name, "Voice tool call");
        match name {
            ANALYZE_WORKSPACE => self.analyze_workspace(parse_args(arguments)?).await,
            DRAW_ON_CANVAS => self.draw_on_canvas(parse_args(arguments)?).await,
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }

    async fn analyze_workspace(&self, args: AnalyzeArgs) -> Result<ToolResponse, ToolError> {
        let scene = self.solver.store().scene();
        let rasterizer = self.solver.rasterizer();
        let capture = SnapshotRequest::full_canvas(self.analysis_max_dimension, RasterFormat::Png);
        let image = tokio::task::spawn_blocking(move || rasterizer.rasterize(&scene, &capture))
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?
            .map_err(|e| ToolError::Failed(e.to_string()))?
            .map(|raster| raster.to_data_uri());

        let analysis = self
            .solver
            .provider()
            .analyze_workspace(WorkspaceAnalysisRequest {
                image,
                focus: args.focus,
            })
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(ToolResponse::success(serde_json::json!({ "analysis": analysis })))
    }

    async fn draw_on_canvas(&self, args: DrawArgs) -> Result<ToolResponse, ToolError> {
        let outcome = self
            .solver
            .generate(GenerationRequest::voice(args.instructions))
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        let response = match outcome {
            GenerationOutcome::Staged {
                shape_id,
                message,
                ..
            } => ToolResponse::success(serde_json::json!({
                "shape_id": shape_id.to_string(),
                "message": message,
            })),
            GenerationOutcome::Responded { message } => {
                ToolResponse::success(serde_json::json!({ "message": message }))
            }
            GenerationOutcome::Cancelled => ToolResponse::error("Drawing was cancelled"),
        };
        Ok(response)
    }
}
