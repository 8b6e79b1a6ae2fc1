use std::fs;
use std::path::Path;

use crate::ml::error::PipelineError;

/// Numerically stable softmax: the max is subtracted before exponentiating
/// so large logits cannot overflow. Empty input yields empty output.
pub fn softmax(raw: &[f32]) -> Vec<f32> {
    let Some(max) = raw.iter().copied().reduce(f32::max) else {
        return Vec::new();
    };
    let exps: Vec<f32> = raw.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Index of the largest score; ties resolve to the lowest index so label
/// selection stays deterministic.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Reads the fixed, versioned class-name list that sits next to a model
/// artifact. Length and order must match the model's output width; the
/// caller checks that at load time.
pub fn load_labels(path: &Path, disease: &str) -> Result<Vec<String>, PipelineError> {
    let raw = fs::read_to_string(path).map_err(|e| PipelineError::ModelLoad {
        disease: disease.to_string(),
        detail: format!("label file {}: {}", path.display(), e),
    })?;
    let labels: Vec<String> =
        serde_json::from_str(&raw).map_err(|e| PipelineError::ModelLoad {
            disease: disease.to_string(),
            detail: format!("corrupt label file {}: {}", path.display(), e),
        })?;
    if labels.is_empty() {
        return Err(PipelineError::ModelLoad {
            disease: disease.to_string(),
            detail: format!("label file {} is empty", path.display()),
        });
    }
    Ok(labels)
}
