//! Narrow contract to the remote inference backend.
//!
//! The gateway never retries: a single backend failure is surfaced
//! immediately and the outward status is decided by the error kind.

use crate::preprocessing::InputTensor;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};

pub mod proto {
    tonic::include_proto!("ovms_inference");
}

use proto::inference_service_client::InferenceServiceClient;
use proto::{PredictRequest, TensorProto};

#[derive(Debug, Error)]
pub enum OvmsError {
    #[error("model `{0}` not found on the inference backend")]
    ModelNotFound(String),
    #[error("inference backend unavailable: {0}")]
    Unavailable(String),
    #[error("inference backend failed to process the request: {0}")]
    RequestProcessing(String),
    #[error("invalid inference request: {0}")]
    InvalidRequest(String),
}

/// One raw output tensor as returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

/// Raw inference result, keyed by output name.
pub type InferenceOutput = HashMap<String, OutputTensor>;

#[tonic::async_trait]
pub trait OvmsConnector: Send + Sync {
    async fn send(&self, input: InputTensor) -> Result<InferenceOutput, OvmsError>;
}

/// gRPC-backed connector bound to one `(model_name, model_version)` pair.
///
/// The channel connects lazily, so constructing a connector performs no
/// network I/O; the first `send` does.
#[derive(Debug)]
pub struct GrpcOvmsConnector {
    client: Mutex<InferenceServiceClient<Channel>>,
    model_name: String,
    model_version: i64,
    timeout: Duration,
}

impl GrpcOvmsConnector {
    pub fn new(
        address: String,
        model_name: String,
        model_version: i64,
        timeout: Duration,
    ) -> Result<Self, OvmsError> {
        let endpoint = Endpoint::from_shared(address)
            .map_err(|e| OvmsError::InvalidRequest(format!("bad backend address: {e}")))?;
        let channel = endpoint.connect_lazy();

        Ok(Self {
            client: Mutex::new(InferenceServiceClient::new(channel)),
            model_name,
            model_version,
            timeout,
        })
    }

    fn map_status(model_name: &str, status: Status) -> OvmsError {
        match status.code() {
            Code::NotFound => OvmsError::ModelNotFound(model_name.to_string()),
            Code::Unavailable | Code::DeadlineExceeded => {
                OvmsError::Unavailable(status.message().to_string())
            }
            Code::InvalidArgument => OvmsError::InvalidRequest(status.message().to_string()),
            _ => OvmsError::RequestProcessing(status.message().to_string()),
        }
    }
}

#[tonic::async_trait]
impl OvmsConnector for GrpcOvmsConnector {
    async fn send(&self, input: InputTensor) -> Result<InferenceOutput, OvmsError> {
        let mut inputs = HashMap::new();
        inputs.insert(
            input.name,
            TensorProto {
                shape: input.shape,
                data: input.data,
            },
        );

        let request = Request::new(PredictRequest {
            model_name: self.model_name.clone(),
            model_version: self.model_version,
            inputs,
        });

        let mut client = self.client.lock().await;
        let response = match timeout(self.timeout, client.predict(request)).await {
            Err(_) => {
                return Err(OvmsError::Unavailable(format!(
                    "no response from backend within {:?}",
                    self.timeout
                )))
            }
            Ok(Err(status)) => return Err(Self::map_status(&self.model_name, status)),
            Ok(Ok(response)) => response.into_inner(),
        };

        Ok(response
            .outputs
            .into_iter()
            .map(|(name, tensor)| {
                (
                    name,
                    OutputTensor {
                        shape: tensor.shape,
                        data: tensor.data,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_status_maps_to_model_not_found() {
        let err = GrpcOvmsConnector::map_status("color_model", Status::not_found("no such model"));
        assert!(matches!(err, OvmsError::ModelNotFound(name) if name == "color_model"));
    }

    #[test]
    fn unavailable_and_deadline_map_to_unavailable() {
        for status in [
            Status::unavailable("backend down"),
            Status::deadline_exceeded("too slow"),
        ] {
            let err = GrpcOvmsConnector::map_status("m", status);
            assert!(matches!(err, OvmsError::Unavailable(_)));
        }
    }

    #[test]
    fn invalid_argument_maps_to_invalid_request() {
        let err = GrpcOvmsConnector::map_status("m", Status::invalid_argument("bad shape"));
        assert!(matches!(err, OvmsError::InvalidRequest(_)));
    }

    #[test]
    fn other_statuses_map_to_request_processing() {
        let err = GrpcOvmsConnector::map_status("m", Status::internal("boom"));
        assert!(matches!(err, OvmsError::RequestProcessing(_)));
    }

    #[test]
    fn bad_backend_address_is_rejected_at_construction() {
        let err = GrpcOvmsConnector::new(
            "not a uri".to_string(),
            "m".to_string(),
            1,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, OvmsError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn send_to_unreachable_backend_reports_unavailable() {
        // Nothing listens on this port; the lazy channel fails on first use.
        let connector = GrpcOvmsConnector::new(
            "http://127.0.0.1:1".to_string(),
            "m".to_string(),
            1,
            Duration::from_secs(2),
        )
        .unwrap();

        let tensor = InputTensor {
            name: "data".to_string(),
            shape: vec![1, 3, 2, 2],
            data: vec![0.0; 12],
        };

        let err = connector.send(tensor).await.unwrap_err();
        assert!(matches!(err, OvmsError::Unavailable(_)));
    }
}
