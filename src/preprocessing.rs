//! Image decoding and tensor conversion for the request pipeline.
//!
//! Every failure here means the caller sent something we could not turn into
//! a valid backend input, so all three error kinds map to a client error at
//! the pipeline boundary.

use crate::model_config::{ColorFormat, InputFormat, InputSpec};
use image::{imageops::FilterType, DynamicImage};
use ndarray::Array3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessingError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to resize image: {0}")]
    Resize(String),
    #[error("failed to transform image: {0}")]
    Transform(String),
}

/// A preprocessed image ready to be sent to the inference backend.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PreprocessingError> {
    image::load_from_memory(bytes).map_err(|e| PreprocessingError::Decode(e.to_string()))
}

pub fn resize(
    image: DynamicImage,
    height: u32,
    width: u32,
) -> Result<DynamicImage, PreprocessingError> {
    if height == 0 || width == 0 {
        return Err(PreprocessingError::Resize(format!(
            "target size {width}x{height} is degenerate"
        )));
    }
    Ok(image.resize_exact(width, height, FilterType::Triangle))
}

/// Turns a decoded image into the tensor described by `spec`: channel
/// conversion, optional BGR reordering, scaling, per-image standardization
/// and NCHW/NHWC layout.
pub fn transform(image: &DynamicImage, spec: &InputSpec) -> Result<InputTensor, PreprocessingError> {
    let channels = spec.channels.unwrap_or(3) as usize;

    if spec.color_format == Some(ColorFormat::Bgr) && channels != 3 {
        return Err(PreprocessingError::Transform(format!(
            "BGR ordering requires 3 channels, got {channels}"
        )));
    }

    let height = image.height() as usize;
    let width = image.width() as usize;

    let raw: Vec<u8> = match channels {
        1 => image.to_luma8().into_raw(),
        3 => image.to_rgb8().into_raw(),
        4 => image.to_rgba8().into_raw(),
        other => {
            return Err(PreprocessingError::Transform(format!(
                "unsupported channel count {other}"
            )))
        }
    };

    let mut tensor = Array3::<f32>::zeros((height, width, channels));
    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                let source_channel = match spec.color_format {
                    Some(ColorFormat::Bgr) => channels - 1 - c,
                    _ => c,
                };
                tensor[[y, x, c]] = f32::from(raw[(y * width + x) * channels + source_channel]);
            }
        }
    }

    if let Some(scale) = spec.scale {
        tensor.mapv_inplace(|v| v * scale as f32);
    }

    if spec.standardization == Some(true) {
        let mean = tensor.mean().unwrap_or(0.0);
        let std = tensor.std(0.0).max(f32::EPSILON);
        tensor.mapv_inplace(|v| (v - mean) / std);
    }

    let (shape, data) = match spec.input_format.unwrap_or(InputFormat::Nchw) {
        InputFormat::Nhwc => (
            vec![1, height as i64, width as i64, channels as i64],
            tensor.into_iter().collect(),
        ),
        InputFormat::Nchw => {
            let chw = tensor.permuted_axes([2, 0, 1]);
            (
                vec![1, channels as i64, height as i64, width as i64],
                chw.iter().copied().collect(),
            )
        }
    };

    Ok(InputTensor {
        name: spec.input_name.clone(),
        shape,
        data,
    })
}
