//! Shaping raw inference output into response bodies.
//!
//! Each model type has one `ResponseBuilder` implementation, selected at
//! build time by the validated `model_type` string. Builders share the
//! output-spec machinery: label lookup through `classes` or
//! `value_index_mapping`, percent-scale `confidence_threshold`, and
//! `top_k_results` truncation.

use crate::model_config::OutputSpec;
use crate::ovms_connector::{InferenceOutput, OutputTensor};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PostprocessingError {
    #[error("output `{0}` missing from inference response")]
    MissingOutput(String),
    #[error("output `{output}` has no value at index {index}")]
    IndexOutOfRange { output: String, index: usize },
    #[error("output `{0}` is not a detection tensor")]
    MalformedDetection(String),
}

pub trait ResponseBuilder: Send + Sync {
    fn build(
        &self,
        output: &InferenceOutput,
        specs: &[OutputSpec],
    ) -> Result<Value, PostprocessingError>;
}

/// Registry of known model types.
pub fn builder_for(model_type: &str) -> Option<Box<dyn ResponseBuilder>> {
    match model_type {
        "classification" => Some(Box::new(ClassificationBuilder)),
        "classification_attributes" => Some(Box::new(AttributesBuilder)),
        "detection" => Some(Box::new(DetectionBuilder)),
        _ => None,
    }
}

fn find_tensor<'a>(
    output: &'a InferenceOutput,
    spec: &OutputSpec,
) -> Result<&'a OutputTensor, PostprocessingError> {
    output
        .get(&spec.output_name)
        .ok_or_else(|| PostprocessingError::MissingOutput(spec.output_name.clone()))
}

fn value_at(tensor: &OutputTensor, spec: &OutputSpec, index: f64) -> Result<f64, PostprocessingError> {
    let index = index as usize;
    tensor
        .data
        .get(index)
        .map(|v| f64::from(*v))
        .ok_or_else(|| PostprocessingError::IndexOutOfRange {
            output: spec.output_name.clone(),
            index,
        })
}

fn passes_threshold(confidence: f64, spec: &OutputSpec) -> bool {
    confidence * 100.0 >= spec.confidence_threshold.unwrap_or(0.0)
}

fn truncate_top_k<T>(results: &mut Vec<T>, spec: &OutputSpec) {
    if let Some(k) = spec.top_k_results {
        // 0 means "no limit", same as unset.
        if k > 0 {
            results.truncate(k);
        }
    }
}

/// Emits every class above the threshold, highest confidence first.
pub struct ClassificationBuilder;

impl ResponseBuilder for ClassificationBuilder {
    fn build(
        &self,
        output: &InferenceOutput,
        specs: &[OutputSpec],
    ) -> Result<Value, PostprocessingError> {
        let mut inferences = Vec::new();
        for spec in specs {
            let Some(classes) = &spec.classes else {
                continue;
            };
            let tensor = find_tensor(output, spec)?;

            let mut scored = Vec::new();
            for (label, index) in classes {
                let confidence = value_at(tensor, spec, *index)?;
                if passes_threshold(confidence, spec) {
                    scored.push((label.as_str(), confidence));
                }
            }
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
            truncate_top_k(&mut scored, spec);

            for (label, confidence) in scored {
                inferences.push(json!({
                    "type": "classification",
                    "subtype": spec.output_name,
                    "tag": {"value": label, "confidence": confidence},
                }));
            }
        }
        Ok(json!({"inferences": inferences}))
    }
}

/// Emits one attribute per output: the highest-scoring mapped label.
pub struct AttributesBuilder;

impl AttributesBuilder {
    fn mapping<'a>(spec: &'a OutputSpec) -> Option<&'a BTreeMap<String, f64>> {
        spec.value_index_mapping.as_ref().or(spec.classes.as_ref())
    }
}

impl ResponseBuilder for AttributesBuilder {
    fn build(
        &self,
        output: &InferenceOutput,
        specs: &[OutputSpec],
    ) -> Result<Value, PostprocessingError> {
        let mut inferences = Vec::new();
        for spec in specs {
            let Some(mapping) = Self::mapping(spec) else {
                continue;
            };
            let tensor = find_tensor(output, spec)?;

            let mut best: Option<(&str, f64)> = None;
            for (label, index) in mapping {
                let confidence = value_at(tensor, spec, *index)?;
                if best.is_none_or(|(_, current)| confidence > current) {
                    best = Some((label.as_str(), confidence));
                }
            }

            if let Some((label, confidence)) = best {
                if passes_threshold(confidence, spec) {
                    inferences.push(json!({
                        "type": "attribute",
                        "attribute": {
                            "name": spec.output_name,
                            "value": label,
                            "confidence": confidence,
                        },
                    }));
                }
            }
        }
        Ok(json!({"inferences": inferences}))
    }
}

/// Interprets the output as rows of
/// `[image_id, class_id, confidence, x_min, y_min, x_max, y_max]`.
pub struct DetectionBuilder;

const DETECTION_ROW_LEN: usize = 7;

impl DetectionBuilder {
    fn label_for(spec: &OutputSpec, class_id: f64) -> String {
        spec.classes
            .as_ref()
            .and_then(|classes| {
                classes
                    .iter()
                    .find(|(_, index)| **index == class_id)
                    .map(|(label, _)| label.clone())
            })
            .unwrap_or_else(|| format!("class_{}", class_id as i64))
    }
}

impl ResponseBuilder for DetectionBuilder {
    fn build(
        &self,
        output: &InferenceOutput,
        specs: &[OutputSpec],
    ) -> Result<Value, PostprocessingError> {
        let mut inferences = Vec::new();
        for spec in specs {
            let tensor = find_tensor(output, spec)?;
            if tensor.data.len() % DETECTION_ROW_LEN != 0 {
                return Err(PostprocessingError::MalformedDetection(
                    spec.output_name.clone(),
                ));
            }

            let mut entities = Vec::new();
            for row in tensor.data.chunks_exact(DETECTION_ROW_LEN) {
                let class_id = f64::from(row[1]);
                let confidence = f64::from(row[2]);
                if !passes_threshold(confidence, spec) {
                    continue;
                }
                let (x_min, y_min, x_max, y_max) = (row[3], row[4], row[5], row[6]);
                entities.push((
                    confidence,
                    json!({
                        "type": "entity",
                        "entity": {
                            "tag": {
                                "value": Self::label_for(spec, class_id),
                                "confidence": confidence,
                            },
                            "box": {
                                "l": x_min,
                                "t": y_min,
                                "w": x_max - x_min,
                                "h": y_max - y_min,
                            },
                        },
                    }),
                ));
            }
            entities.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
            truncate_top_k(&mut entities, spec);
            inferences.extend(entities.into_iter().map(|(_, entity)| entity));
        }
        Ok(json!({"inferences": inferences}))
    }
}
