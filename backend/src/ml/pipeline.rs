use std::collections::HashMap;
use std::path::PathBuf;

use shared::{Explanation, InferenceResponse, InputKind};

use crate::ml::error::PipelineError;

/// Identity of a disease pipeline. Immutable once constructed; every
/// concrete pipeline carries a `&'static` one.
#[derive(Debug)]
pub struct PipelineDescriptor {
    pub key: &'static str,
    pub display_name: &'static str,
    pub input_kind: InputKind,
    pub version: &'static str,
}

/// Tagged inference payload. The kind must match the pipeline's declared
/// `input_kind`; a mismatch is a caller error, not a pipeline fault.
#[derive(Debug, Clone)]
pub enum InferencePayload {
    Image { bytes: Vec<u8> },
    Tabular { features: HashMap<String, f64> },
}

impl InferencePayload {
    pub fn kind(&self) -> InputKind {
        match self {
            InferencePayload::Image { .. } => InputKind::Image,
            InferencePayload::Tabular { .. } => InputKind::Tabular,
        }
    }
}

/// Process-scoped configuration the dispatcher hands to pipeline
/// constructors; resolves the versioned artifact layout
/// `{root}/{disease}/model/{version}/{artifact}` with a sibling label file.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub model_root: PathBuf,
}

impl PipelineContext {
    pub fn new(model_root: impl Into<PathBuf>) -> Self {
        Self {
            model_root: model_root.into(),
        }
    }

    pub fn artifact_path(&self, disease: &str, version: &str, artifact: &str) -> PathBuf {
        self.model_root
            .join(disease)
            .join("model")
            .join(version)
            .join(artifact)
    }

    pub fn label_path(&self, disease: &str) -> PathBuf {
        self.model_root.join(disease).join("labels.json")
    }
}

/// The closed contract every disease implementation satisfies. `load` is
/// idempotent and must not crash the process when an artifact is missing;
/// `infer` is pure given a loaded state. Implementations are shared across
/// worker threads once loaded, hence `Send + Sync`.
pub trait DiseasePipeline: Send + Sync {
    fn descriptor(&self) -> &PipelineDescriptor;

    fn load(&mut self) -> Result<(), PipelineError>;

    fn infer(&self, payload: &InferencePayload) -> Result<InferenceResponse, PipelineError>;

    /// Capability hook. Pipelines that can produce an explanation override
    /// this; the default reports "not explainable" rather than failing.
    fn explain(&self, _payload: &InferencePayload) -> Result<Explanation, PipelineError> {
        Ok(Explanation::unsupported())
    }
}

impl std::fmt::Debug for dyn DiseasePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiseasePipeline")
            .field("descriptor", self.descriptor())
            .finish()
    }
}

/// Guard shared by the concrete pipelines: payloads must match the
/// descriptor before any preprocessing happens.
pub fn check_payload_kind(
    descriptor: &PipelineDescriptor,
    payload: &InferencePayload,
) -> Result<(), PipelineError> {
    if payload.kind() != descriptor.input_kind {
        return Err(PipelineError::InvalidInput {
            expected: descriptor.input_kind,
            got: payload.kind(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_resolves_versioned_layout() {
        let ctx = PipelineContext::new("/srv/models");
        assert_eq!(
            ctx.artifact_path("tb", "v1", "model.json"),
            PathBuf::from("/srv/models/tb/model/v1/model.json")
        );
        assert_eq!(
            ctx.label_path("tb"),
            PathBuf::from("/srv/models/tb/labels.json")
        );
    }

    #[test]
    fn payload_kind_matches_variant() {
        let img = InferencePayload::Image { bytes: vec![1] };
        let tab = InferencePayload::Tabular {
            features: HashMap::new(),
        };
        assert_eq!(img.kind(), InputKind::Image);
        assert_eq!(tab.kind(), InputKind::Tabular);
    }
}
