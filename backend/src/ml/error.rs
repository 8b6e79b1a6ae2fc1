use shared::InputKind;

/// Failure taxonomy for the pipeline core. Decode/Validation/
/// UnsupportedFormat/InvalidInput/UnknownDisease are caller errors and map
/// to 4xx at the HTTP boundary; the rest are server-side and surface as an
/// opaque 5xx.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("image decoding failed: {0}")]
    Decode(String),
    #[error("invalid tabular input: {0}")]
    Validation(String),
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),
    #[error("payload kind mismatch: pipeline expects {expected}, got {got}")]
    InvalidInput { expected: InputKind, got: InputKind },
    #[error("model artifact error for '{disease}': {detail}")]
    ModelLoad { disease: String, detail: String },
    #[error("pipeline '{0}' invoked before a successful load")]
    NotLoaded(String),
    #[error("label set for '{disease}' has {labels} entries but the model outputs {outputs}")]
    LabelMismatch {
        disease: String,
        labels: usize,
        outputs: usize,
    },
    #[error("unknown disease key: {0}")]
    UnknownDisease(String),
    #[error("inference timed out after {0} ms")]
    Timeout(u64),
}

impl PipelineError {
    /// Caller errors are safe to echo back verbatim; everything else gets an
    /// opaque body at the HTTP boundary.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode(_)
                | PipelineError::Validation(_)
                | PipelineError::UnsupportedFormat(_)
                | PipelineError::InvalidInput { .. }
                | PipelineError::UnknownDisease(_)
        )
    }
}
