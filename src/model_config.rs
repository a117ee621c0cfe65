//! Validation of per-model JSON configuration files.
//!
//! A model configuration describes one HTTP endpoint: how to preprocess the
//! uploaded image for the backend model (`inputs`), how to interpret the raw
//! inference output (`outputs`), and which backend model to call
//! (`ovms_mapping`). Validation is local and deterministic and fails fast:
//! the first violated constraint is reported with the entry and field that
//! caused it. An absent optional field is never an error; a present field
//! with the wrong type or an out-of-range value always is.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{entry}: field `{field}` {problem}")]
pub struct ValidationError {
    pub entry: String,
    pub field: String,
    pub problem: String,
}

impl ValidationError {
    fn new(entry: impl Into<String>, field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            field: field.into(),
            problem: problem.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Nchw,
    Nhwc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Rgb,
    Bgr,
}

/// How to turn the uploaded image into one named backend input tensor.
#[derive(Debug, Clone)]
pub struct InputSpec {
    pub input_name: String,
    pub channels: Option<u32>,
    /// `(height, width)`; the two dimensions are only valid together.
    pub target_size: Option<(u32, u32)>,
    pub input_format: Option<InputFormat>,
    pub scale: Option<f64>,
    pub standardization: Option<bool>,
    pub color_format: Option<ColorFormat>,
}

impl InputSpec {
    /// Pass-through spec used when a model config declares no inputs.
    pub fn passthrough(input_name: &str) -> Self {
        Self {
            input_name: input_name.to_string(),
            channels: None,
            target_size: None,
            input_format: None,
            scale: None,
            standardization: None,
            color_format: None,
        }
    }
}

/// How to interpret one named backend output tensor.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub output_name: String,
    pub classes: Option<BTreeMap<String, f64>>,
    pub value_index_mapping: Option<BTreeMap<String, f64>>,
    /// Percent scale, `[0, 100]`.
    pub confidence_threshold: Option<f64>,
    pub top_k_results: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct OvmsMapping {
    pub model_name: String,
    pub model_version: i64,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub endpoint: String,
    pub model_type: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    pub ovms_mapping: OvmsMapping,
}

/// Validates a whole raw model configuration document.
pub fn validate_config(raw: &Value) -> Result<ModelConfig, ValidationError> {
    let map = raw
        .as_object()
        .ok_or_else(|| ValidationError::new("model config", "<root>", "must be a JSON object"))?;

    let endpoint = required_string("model config", map, "endpoint")?;
    let model_type = required_string("model config", map, "model_type")?;
    let ovms_mapping = validate_ovms_mapping(map)?;
    let inputs = validate_inputs(raw)?;
    let outputs = validate_outputs(raw)?;

    Ok(ModelConfig {
        endpoint,
        model_type,
        inputs,
        outputs,
        ovms_mapping,
    })
}

/// Validates the `inputs` array. A missing array means the model takes the
/// decoded image as-is.
pub fn validate_inputs(raw: &Value) -> Result<Vec<InputSpec>, ValidationError> {
    let Some(entries) = raw.get("inputs") else {
        return Ok(Vec::new());
    };
    let entries = entries
        .as_array()
        .ok_or_else(|| ValidationError::new("model config", "inputs", "must be an array"))?;
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| validate_input_entry(idx, entry))
        .collect()
}

/// Validates the `outputs` array. A missing array is allowed.
pub fn validate_outputs(raw: &Value) -> Result<Vec<OutputSpec>, ValidationError> {
    let Some(entries) = raw.get("outputs") else {
        return Ok(Vec::new());
    };
    let entries = entries
        .as_array()
        .ok_or_else(|| ValidationError::new("model config", "outputs", "must be an array"))?;
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| validate_output_entry(idx, entry))
        .collect()
}

fn validate_input_entry(idx: usize, value: &Value) -> Result<InputSpec, ValidationError> {
    let entry = format!("inputs[{idx}]");
    let map = value
        .as_object()
        .ok_or_else(|| ValidationError::new(&entry, "<entry>", "must be a JSON object"))?;

    let input_name = required_string(&entry, map, "input_name")?;

    let channels = match map.get("channels") {
        None => None,
        Some(v) => {
            let n = v.as_u64().ok_or_else(|| {
                ValidationError::new(&entry, "channels", "must be an integer")
            })?;
            if !matches!(n, 1 | 3 | 4) {
                return Err(ValidationError::new(
                    &entry,
                    "channels",
                    format!("must be 1, 3 or 4, got {n}"),
                ));
            }
            Some(n as u32)
        }
    };

    let target_height = optional_dimension(&entry, map, "target_height")?;
    let target_width = optional_dimension(&entry, map, "target_width")?;
    let target_size = match (target_height, target_width) {
        (Some(h), Some(w)) => Some((h, w)),
        (None, None) => None,
        _ => {
            return Err(ValidationError::new(
                &entry,
                "target_height/target_width",
                "must be specified together or not at all",
            ))
        }
    };

    let input_format = match map.get("input_format") {
        None => None,
        Some(v) => match v.as_str() {
            Some("NCHW") => Some(InputFormat::Nchw),
            Some("NHWC") => Some(InputFormat::Nhwc),
            _ => {
                return Err(ValidationError::new(
                    &entry,
                    "input_format",
                    format!("must be `NCHW` or `NHWC`, got {v}"),
                ))
            }
        },
    };

    let scale = match map.get("scale") {
        None => None,
        Some(v) => {
            let s = v
                .as_f64()
                .ok_or_else(|| ValidationError::new(&entry, "scale", "must be a number"))?;
            if s <= 0.0 {
                return Err(ValidationError::new(
                    &entry,
                    "scale",
                    format!("must be greater than zero, got {s}"),
                ));
            }
            Some(s)
        }
    };

    let standardization = match map.get("standardization") {
        None => None,
        Some(v) => Some(v.as_bool().ok_or_else(|| {
            ValidationError::new(&entry, "standardization", "must be a boolean")
        })?),
    };

    let color_format = match map.get("color_format") {
        None => None,
        Some(v) => match v.as_str() {
            Some("RGB") => Some(ColorFormat::Rgb),
            Some("BGR") => Some(ColorFormat::Bgr),
            _ => {
                return Err(ValidationError::new(
                    &entry,
                    "color_format",
                    format!("must be `RGB` or `BGR`, got {v}"),
                ))
            }
        },
    };

    Ok(InputSpec {
        input_name,
        channels,
        target_size,
        input_format,
        scale,
        standardization,
        color_format,
    })
}

fn validate_output_entry(idx: usize, value: &Value) -> Result<OutputSpec, ValidationError> {
    let entry = format!("outputs[{idx}]");
    let map = value
        .as_object()
        .ok_or_else(|| ValidationError::new(&entry, "<entry>", "must be a JSON object"))?;

    let output_name = required_string(&entry, map, "output_name")?;
    let classes = optional_label_mapping(&entry, map, "classes")?;
    let value_index_mapping = optional_label_mapping(&entry, map, "value_index_mapping")?;

    let confidence_threshold = match map.get("confidence_threshold") {
        None => None,
        Some(v) => {
            let t = v.as_f64().ok_or_else(|| {
                ValidationError::new(&entry, "confidence_threshold", "must be a number")
            })?;
            if !(0.0..=100.0).contains(&t) {
                return Err(ValidationError::new(
                    &entry,
                    "confidence_threshold",
                    format!("must lie within [0, 100], got {t}"),
                ));
            }
            Some(t)
        }
    };

    let top_k_results = match map.get("top_k_results") {
        None => None,
        Some(v) => {
            let k = v.as_u64().ok_or_else(|| {
                ValidationError::new(&entry, "top_k_results", "must be a non-negative integer")
            })?;
            Some(k as usize)
        }
    };

    Ok(OutputSpec {
        output_name,
        classes,
        value_index_mapping,
        confidence_threshold,
        top_k_results,
    })
}

fn validate_ovms_mapping(map: &Map<String, Value>) -> Result<OvmsMapping, ValidationError> {
    let entry = "ovms_mapping";
    let mapping = map
        .get("ovms_mapping")
        .ok_or_else(|| ValidationError::new("model config", entry, "is required"))?
        .as_object()
        .ok_or_else(|| ValidationError::new("model config", entry, "must be a JSON object"))?;

    let model_name = required_string(entry, mapping, "model_name")?;
    let model_version = mapping
        .get("model_version")
        .ok_or_else(|| ValidationError::new(entry, "model_version", "is required"))?
        .as_i64()
        .ok_or_else(|| ValidationError::new(entry, "model_version", "must be an integer"))?;

    Ok(OvmsMapping {
        model_name,
        model_version,
    })
}

fn required_string(
    entry: &str,
    map: &Map<String, Value>,
    field: &str,
) -> Result<String, ValidationError> {
    let value = map
        .get(field)
        .ok_or_else(|| ValidationError::new(entry, field, "is required"))?;
    let value = value
        .as_str()
        .ok_or_else(|| ValidationError::new(entry, field, "must be a string"))?;
    if value.is_empty() {
        return Err(ValidationError::new(entry, field, "must not be empty"));
    }
    Ok(value.to_string())
}

fn optional_dimension(
    entry: &str,
    map: &Map<String, Value>,
    field: &str,
) -> Result<Option<u32>, ValidationError> {
    let Some(value) = map.get(field) else {
        return Ok(None);
    };
    let n = value
        .as_u64()
        .ok_or_else(|| ValidationError::new(entry, field, "must be a positive integer"))?;
    if n == 0 {
        return Err(ValidationError::new(
            entry,
            field,
            "must be greater than zero",
        ));
    }
    Ok(Some(n as u32))
}

/// Label mappings go from class label to numeric tensor index. An empty
/// mapping, a numeric key (the index-to-label orientation) or a
/// string-encoded index like `"0.0"` is rejected.
fn optional_label_mapping(
    entry: &str,
    map: &Map<String, Value>,
    field: &str,
) -> Result<Option<BTreeMap<String, f64>>, ValidationError> {
    let Some(value) = map.get(field) else {
        return Ok(None);
    };
    let mapping = value.as_object().ok_or_else(|| {
        ValidationError::new(entry, field, "must be a mapping from label to index")
    })?;
    if mapping.is_empty() {
        return Err(ValidationError::new(entry, field, "must not be empty"));
    }

    let mut out = BTreeMap::new();
    for (label, index) in mapping {
        if label.parse::<f64>().is_ok() {
            return Err(ValidationError::new(
                entry,
                field,
                format!("keys must be class labels, got numeric key `{label}`"),
            ));
        }
        let index = index.as_f64().ok_or_else(|| {
            ValidationError::new(
                entry,
                field,
                format!("index for label `{label}` must be numeric"),
            )
        })?;
        out.insert(label.clone(), index);
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_config() -> Value {
        json!({
            "endpoint": "some_color_model",
            "model_type": "classification_attributes",
            "inputs": [{"input_name": "result"}],
            "outputs": [{
                "output_name": "prob",
                "classes": {
                    "white": 0.0, "gray": 1.0, "yellow": 2.0, "red": 3.0,
                    "green": 4.0, "blue": 5.0, "black": 6.0
                }
            }],
            "ovms_mapping": {"model_name": "color_model", "model_version": 0}
        })
    }

    fn with_input_field(field: &str, value: Value) -> Value {
        let mut config = base_config();
        config["inputs"][0][field] = value;
        config
    }

    fn with_output_field(field: &str, value: Value) -> Value {
        let mut config = base_config();
        config["outputs"][0][field] = value;
        config
    }

    #[test]
    fn fully_specified_input_config_is_accepted() {
        let mut config = base_config();
        let input = &mut config["inputs"][0];
        input["channels"] = json!(3);
        input["target_height"] = json!(256);
        input["target_width"] = json!(256);
        input["input_format"] = json!("NCHW");
        input["scale"] = json!(1.0 / 255.0);
        input["standardization"] = json!(true);
        input["color_format"] = json!("RGB");

        let specs = validate_inputs(&config).unwrap();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.input_name, "result");
        assert_eq!(spec.channels, Some(3));
        assert_eq!(spec.target_size, Some((256, 256)));
        assert_eq!(spec.input_format, Some(InputFormat::Nchw));
        assert_eq!(spec.standardization, Some(true));
        assert_eq!(spec.color_format, Some(ColorFormat::Rgb));
    }

    #[test]
    fn absent_optional_input_fields_are_not_an_error() {
        let specs = validate_inputs(&base_config()).unwrap();
        let spec = &specs[0];
        assert!(spec.channels.is_none());
        assert!(spec.target_size.is_none());
        assert!(spec.input_format.is_none());
        assert!(spec.scale.is_none());
        assert!(spec.standardization.is_none());
        assert!(spec.color_format.is_none());
    }

    #[test]
    fn missing_inputs_array_yields_no_specs() {
        let mut config = base_config();
        config.as_object_mut().unwrap().remove("inputs");
        assert!(validate_inputs(&config).unwrap().is_empty());
    }

    #[test]
    fn missing_input_name_is_rejected() {
        let mut config = base_config();
        config["inputs"][0] = json!({"channels": 3});
        let err = validate_inputs(&config).unwrap_err();
        assert_eq!(err.field, "input_name");
    }

    #[test]
    fn non_numeric_channels_is_rejected() {
        let config = with_input_field("channels", json!("two"));
        let err = validate_inputs(&config).unwrap_err();
        assert_eq!(err.field, "channels");
    }

    #[test]
    fn out_of_set_channels_is_rejected() {
        let config = with_input_field("channels", json!(2));
        assert!(validate_inputs(&config).is_err());
    }

    #[test]
    fn target_height_without_width_is_rejected() {
        let config = with_input_field("target_height", json!(256));
        let err = validate_inputs(&config).unwrap_err();
        assert_eq!(err.field, "target_height/target_width");
    }

    #[test]
    fn target_width_without_height_is_rejected() {
        let config = with_input_field("target_width", json!(256));
        assert!(validate_inputs(&config).is_err());
    }

    #[test]
    fn zero_target_dimension_is_rejected() {
        let mut config = with_input_field("target_height", json!(0));
        config["inputs"][0]["target_width"] = json!(256);
        assert!(validate_inputs(&config).is_err());
    }

    #[test]
    fn unknown_input_format_is_rejected() {
        let config = with_input_field("input_format", json!("CHWN"));
        let err = validate_inputs(&config).unwrap_err();
        assert_eq!(err.field, "input_format");
    }

    #[test]
    fn zero_scale_is_rejected() {
        let config = with_input_field("scale", json!(0));
        assert!(validate_inputs(&config).is_err());
    }

    #[test]
    fn string_scale_is_rejected() {
        let config = with_input_field("scale", json!("zero"));
        assert!(validate_inputs(&config).is_err());
    }

    #[test]
    fn string_standardization_is_rejected() {
        let config = with_input_field("standardization", json!("no"));
        let err = validate_inputs(&config).unwrap_err();
        assert_eq!(err.field, "standardization");
    }

    #[test]
    fn unknown_color_format_is_rejected() {
        let config = with_input_field("color_format", json!("RGR"));
        let err = validate_inputs(&config).unwrap_err();
        assert_eq!(err.field, "color_format");
    }

    #[test]
    fn valid_output_config_is_accepted() {
        let config = with_output_field(
            "value_index_mapping",
            json!({"male": 0.0, "female": 1.0}),
        );
        let specs = validate_outputs(&config).unwrap();
        let spec = &specs[0];
        assert_eq!(spec.output_name, "prob");
        assert_eq!(spec.classes.as_ref().unwrap().len(), 7);
        assert_eq!(spec.value_index_mapping.as_ref().unwrap()["female"], 1.0);
    }

    #[test]
    fn integer_indices_in_mappings_are_accepted() {
        let config = with_output_field("value_index_mapping", json!({"male": 1, "female": 1}));
        assert!(validate_outputs(&config).is_ok());
    }

    #[test]
    fn empty_classes_mapping_is_rejected() {
        let config = with_output_field("classes", json!({}));
        let err = validate_outputs(&config).unwrap_err();
        assert_eq!(err.field, "classes");
    }

    #[test]
    fn empty_value_index_mapping_is_rejected() {
        let config = with_output_field("value_index_mapping", json!({}));
        assert!(validate_outputs(&config).is_err());
    }

    #[test]
    fn string_encoded_indices_are_rejected() {
        let config =
            with_output_field("value_index_mapping", json!({"male": "0.0", "female": "1.0"}));
        assert!(validate_outputs(&config).is_err());
    }

    #[test]
    fn numeric_keys_are_rejected() {
        // Mapping oriented index-to-label instead of label-to-index.
        let config = with_output_field("classes", json!({"1": "green", "0": "red"}));
        assert!(validate_outputs(&config).is_err());
    }

    #[test]
    fn confidence_threshold_bounds_are_enforced() {
        assert!(validate_outputs(&with_output_field("confidence_threshold", json!(50))).is_ok());
        assert!(validate_outputs(&with_output_field("confidence_threshold", json!(0))).is_ok());
        assert!(validate_outputs(&with_output_field("confidence_threshold", json!(100))).is_ok());
        assert!(validate_outputs(&with_output_field("confidence_threshold", json!(120))).is_err());
        assert!(validate_outputs(&with_output_field("confidence_threshold", json!(-5))).is_err());
        assert!(
            validate_outputs(&with_output_field("confidence_threshold", json!("zero"))).is_err()
        );
    }

    #[test]
    fn top_k_results_must_be_a_non_negative_integer() {
        assert!(validate_outputs(&with_output_field("top_k_results", json!(5))).is_ok());
        assert!(validate_outputs(&with_output_field("top_k_results", json!(0))).is_ok());
        assert!(validate_outputs(&with_output_field("top_k_results", json!(-1))).is_err());
        assert!(validate_outputs(&with_output_field("top_k_results", json!("zero"))).is_err());
    }

    #[test]
    fn missing_output_name_is_rejected() {
        let mut config = base_config();
        config["outputs"][0] = json!({"classes": {"red": 0.0}});
        let err = validate_outputs(&config).unwrap_err();
        assert_eq!(err.field, "output_name");
    }

    #[test]
    fn whole_config_validates() {
        let config = validate_config(&base_config()).unwrap();
        assert_eq!(config.endpoint, "some_color_model");
        assert_eq!(config.model_type, "classification_attributes");
        assert_eq!(config.ovms_mapping.model_name, "color_model");
        assert_eq!(config.ovms_mapping.model_version, 0);
        assert_eq!(config.inputs.len(), 1);
        assert_eq!(config.outputs.len(), 1);
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let mut config = base_config();
        config.as_object_mut().unwrap().remove("endpoint");
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.field, "endpoint");
    }

    #[test]
    fn missing_ovms_mapping_is_rejected() {
        let mut config = base_config();
        config.as_object_mut().unwrap().remove("ovms_mapping");
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.field, "ovms_mapping");
    }

    #[test]
    fn validation_error_names_entry_and_field() {
        let config = with_input_field("channels", json!("two"));
        let err = validate_inputs(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("inputs[0]"));
        assert!(message.contains("channels"));
    }
}
