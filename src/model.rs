//! The per-request pipeline: decode, preprocess, infer, postprocess.
//!
//! A `Model` is built once at startup and shared read-only across requests;
//! the only suspending operation is the backend call. Every failure in the
//! pipeline is a `PipelineError` and is translated to an HTTP status exactly
//! once, at the request handler.

use crate::model_config::{InputSpec, ModelConfig, OutputSpec};
use crate::ovms_connector::{OvmsConnector, OvmsError};
use crate::postprocessing::{PostprocessingError, ResponseBuilder};
use crate::preprocessing::{self, InputTensor, PreprocessingError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Preprocessing(#[from] PreprocessingError),
    #[error(transparent)]
    Inference(#[from] OvmsError),
    #[error(transparent)]
    Postprocessing(#[from] PostprocessingError),
}

impl PipelineError {
    /// The single error-to-status translation table.
    ///
    /// Preprocessing failures and malformed inference requests are the
    /// caller's fault; a missing backend model or a backend-side processing
    /// failure is an operator fault; an unreachable or timed-out backend is
    /// transient and worth a retry by the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::Preprocessing(_) => StatusCode::BAD_REQUEST,
            PipelineError::Inference(OvmsError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            PipelineError::Inference(OvmsError::ModelNotFound(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PipelineError::Inference(OvmsError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Inference(OvmsError::RequestProcessing(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PipelineError::Postprocessing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let body = json!({"error": self.to_string()});
        (self.status(), Json(body)).into_response()
    }
}

pub struct Model {
    endpoint: String,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
    connector: Arc<dyn OvmsConnector>,
    response_builder: Box<dyn ResponseBuilder>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("endpoint", &self.endpoint)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl Model {
    pub fn new(
        config: ModelConfig,
        connector: Arc<dyn OvmsConnector>,
        response_builder: Box<dyn ResponseBuilder>,
    ) -> Self {
        Self {
            endpoint: config.endpoint,
            inputs: config.inputs,
            outputs: config.outputs,
            connector,
            response_builder,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Decodes the uploaded bytes and converts them into the backend input
    /// tensor described by the bound input spec.
    pub fn preprocess_binary_image(&self, bytes: &[u8]) -> Result<InputTensor, PreprocessingError> {
        let default_spec;
        let spec = match self.inputs.first() {
            Some(spec) => spec,
            None => {
                default_spec = InputSpec::passthrough("input");
                &default_spec
            }
        };

        let image = preprocessing::decode(bytes)?;
        let image = match spec.target_size {
            Some((height, width)) => preprocessing::resize(image, height, width)?,
            None => image,
        };
        preprocessing::transform(&image, spec)
    }

    /// Runs the full pipeline for one request body.
    pub async fn handle_request(&self, body: &[u8]) -> Result<Value, PipelineError> {
        let tensor = self.preprocess_binary_image(body)?;
        let output = self.connector.send(tensor).await?;
        let response = self.response_builder.build(&output, &self.outputs)?;
        Ok(response)
    }
}
