//! Assembles `Model` instances from on-disk configuration files.
//!
//! A file that cannot be read or is not JSON fails with `BuildError::Load`;
//! a well-formed document that violates the schema fails with
//! `BuildError::Validation`. Building performs no network I/O: the backend
//! connector connects lazily on the first request.

use crate::model::Model;
use crate::model_config::{validate_config, ValidationError};
use crate::ovms_connector::{GrpcOvmsConnector, OvmsError};
use crate::postprocessing::builder_for;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to load model config `{path}`: {reason}")]
    Load { path: String, reason: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unknown model type `{0}`")]
    UnknownModelType(String),
    #[error("failed to configure backend connector: {0}")]
    Connector(OvmsError),
}

pub fn load_model_config(path: &Path) -> Result<Value, BuildError> {
    let load_error = |reason: String| BuildError::Load {
        path: path.display().to_string(),
        reason,
    };
    let raw = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| load_error(e.to_string()))
}

pub fn build_model(
    path: &Path,
    ovms_address: &str,
    request_timeout: Duration,
) -> Result<Model, BuildError> {
    let raw = load_model_config(path)?;
    let config = validate_config(&raw)?;

    let response_builder = builder_for(&config.model_type)
        .ok_or_else(|| BuildError::UnknownModelType(config.model_type.clone()))?;

    let connector = GrpcOvmsConnector::new(
        ovms_address.to_string(),
        config.ovms_mapping.model_name.clone(),
        config.ovms_mapping.model_version,
        request_timeout,
    )
    .map_err(BuildError::Connector)?;

    tracing::info!(
        endpoint = %config.endpoint,
        model_type = %config.model_type,
        backend_model = %config.ovms_mapping.model_name,
        "loaded model configuration"
    );

    Ok(Model::new(config, Arc::new(connector), response_builder))
}
