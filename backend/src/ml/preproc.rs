use std::collections::HashMap;
use std::fs;
use std::path::Path;

use image::imageops::FilterType;
use ndarray::Array3;
use serde::Deserialize;

use crate::ml::error::PipelineError;

/// Color model a pipeline's model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Rgb,
    Grayscale,
}

/// Decodes arbitrary image bytes, converts to the requested color model,
/// resizes to `target_size` and scales intensities to [0, 1]. Output is
/// channels-first (C, H, W), the layout the model scaffold consumes.
pub fn prepare_image(
    bytes: &[u8],
    target_size: (u32, u32),
    mode: ChannelMode,
) -> Result<Array3<f32>, PipelineError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| PipelineError::Decode(e.to_string()))?;

    let (width, height) = target_size;
    let resized = decoded.resize_exact(width, height, FilterType::Triangle);

    let (h, w) = (height as usize, width as usize);
    let tensor = match mode {
        ChannelMode::Rgb => {
            let rgb = resized.to_rgb8();
            Array3::from_shape_fn((3, h, w), |(c, y, x)| {
                rgb.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
            })
        }
        ChannelMode::Grayscale => {
            let gray = resized.to_luma8();
            Array3::from_shape_fn((1, h, w), |(_, y, x)| {
                gray.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0
            })
        }
    };
    Ok(tensor)
}

/// Standardization state fitted at training time. Feature order in `fields`
/// is the order the model was trained with; `transform` must emit values in
/// exactly that order or predictions are silently corrupted.
#[derive(Debug, Clone, Deserialize)]
pub struct FittedScaler {
    pub fields: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl FittedScaler {
    pub fn from_file(path: &Path, disease: &str) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(path).map_err(|e| PipelineError::ModelLoad {
            disease: disease.to_string(),
            detail: format!("scaler artifact {}: {}", path.display(), e),
        })?;
        let scaler: FittedScaler =
            serde_json::from_str(&raw).map_err(|e| PipelineError::ModelLoad {
                disease: disease.to_string(),
                detail: format!("corrupt scaler artifact {}: {}", path.display(), e),
            })?;
        scaler.validate(disease)?;
        Ok(scaler)
    }

    fn validate(&self, disease: &str) -> Result<(), PipelineError> {
        if self.fields.is_empty()
            || self.mean.len() != self.fields.len()
            || self.scale.len() != self.fields.len()
        {
            return Err(PipelineError::ModelLoad {
                disease: disease.to_string(),
                detail: format!(
                    "scaler dimensions disagree: {} fields, {} means, {} scales",
                    self.fields.len(),
                    self.mean.len(),
                    self.scale.len()
                ),
            });
        }
        if self.scale.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(PipelineError::ModelLoad {
                disease: disease.to_string(),
                detail: "scaler contains a zero or non-finite scale factor".to_string(),
            });
        }
        Ok(())
    }

    fn standardize(&self, idx: usize, value: f64) -> f64 {
        (value - self.mean[idx]) / self.scale[idx]
    }
}

/// Validates that `features` contains exactly the scaler's training fields
/// and standardizes each value, emitting them in the scaler's training
/// order. Lookup is keyed by field name, so the caller's key order never
/// affects the output.
pub fn prepare_tabular(
    features: &HashMap<String, f64>,
    scaler: &FittedScaler,
) -> Result<Vec<f64>, PipelineError> {
    let mut missing: Vec<&str> = scaler
        .fields
        .iter()
        .filter(|f| !features.contains_key(f.as_str()))
        .map(|f| f.as_str())
        .collect();
    let mut extra: Vec<&str> = features
        .keys()
        .filter(|k| !scaler.fields.iter().any(|f| f == *k))
        .map(|k| k.as_str())
        .collect();
    let mut non_finite: Vec<&str> = features
        .iter()
        .filter(|(_, v)| !v.is_finite())
        .map(|(k, _)| k.as_str())
        .collect();

    if !missing.is_empty() || !extra.is_empty() || !non_finite.is_empty() {
        missing.sort_unstable();
        extra.sort_unstable();
        non_finite.sort_unstable();
        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!("missing fields: {}", missing.join(", ")));
        }
        if !extra.is_empty() {
            parts.push(format!("unexpected fields: {}", extra.join(", ")));
        }
        if !non_finite.is_empty() {
            parts.push(format!("non-numeric fields: {}", non_finite.join(", ")));
        }
        return Err(PipelineError::Validation(parts.join("; ")));
    }

    Ok(scaler
        .fields
        .iter()
        .enumerate()
        .map(|(idx, field)| scaler.standardize(idx, features[field]))
        .collect())
}
