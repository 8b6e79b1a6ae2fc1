use std::collections::BTreeMap;
use std::time::Instant;

use shared::{InferenceMeta, InferenceResponse};

use crate::ml::error::PipelineError;
use crate::ml::model::ModelHandle;
use crate::ml::pipeline::{
    check_payload_kind, DiseasePipeline, InferencePayload, PipelineContext, PipelineDescriptor,
};
use crate::ml::postproc::{argmax, load_labels, softmax};
use crate::ml::preproc::{prepare_image, ChannelMode};

struct LoadedState {
    model: ModelHandle,
    labels: Vec<String>,
}

/// Shared implementation behind the four image-kind diseases. They differ
/// only in descriptor, label set, input size and channel mode, so each
/// disease module configures one of these rather than duplicating the
/// decode/forward/softmax path.
pub struct ImageClassifierPipeline {
    descriptor: &'static PipelineDescriptor,
    ctx: PipelineContext,
    input_size: (u32, u32),
    channel_mode: ChannelMode,
    state: Option<LoadedState>,
}

impl ImageClassifierPipeline {
    pub fn new(
        descriptor: &'static PipelineDescriptor,
        ctx: &PipelineContext,
        input_size: (u32, u32),
        channel_mode: ChannelMode,
    ) -> Self {
        Self {
            descriptor,
            ctx: ctx.clone(),
            input_size,
            channel_mode,
            state: None,
        }
    }

    fn loaded(&self) -> Result<&LoadedState, PipelineError> {
        self.state
            .as_ref()
            .ok_or_else(|| PipelineError::NotLoaded(self.descriptor.key.to_string()))
    }
}

impl DiseasePipeline for ImageClassifierPipeline {
    fn descriptor(&self) -> &PipelineDescriptor {
        self.descriptor
    }

    fn load(&mut self) -> Result<(), PipelineError> {
        if self.state.is_some() {
            return Ok(());
        }
        let key = self.descriptor.key;
        let model_path = self
            .ctx
            .artifact_path(key, self.descriptor.version, "model.json");
        let model = ModelHandle::load(&model_path, key)?;
        let labels = load_labels(&self.ctx.label_path(key), key)?;
        if labels.len() != model.output_dim() {
            return Err(PipelineError::LabelMismatch {
                disease: key.to_string(),
                labels: labels.len(),
                outputs: model.output_dim(),
            });
        }
        self.state = Some(LoadedState { model, labels });
        Ok(())
    }

    fn infer(&self, payload: &InferencePayload) -> Result<InferenceResponse, PipelineError> {
        let started = Instant::now();
        let state = self.loaded()?;
        check_payload_kind(self.descriptor, payload)?;
        let InferencePayload::Image { bytes } = payload else {
            unreachable!("kind checked above");
        };

        let tensor = prepare_image(bytes, self.input_size, self.channel_mode)?;
        let flat: Vec<f32> = tensor.iter().copied().collect();
        let logits = state.model.forward(&flat);
        let probs = softmax(&logits);
        let idx = argmax(&probs).ok_or_else(|| PipelineError::ModelLoad {
            disease: self.descriptor.key.to_string(),
            detail: "model produced an empty score vector".to_string(),
        })?;

        let prob_map: BTreeMap<String, f32> = state
            .labels
            .iter()
            .cloned()
            .zip(probs.iter().copied())
            .collect();

        Ok(InferenceResponse {
            label: state.labels[idx].clone(),
            probs: prob_map,
            meta: InferenceMeta {
                version: self.descriptor.version.to_string(),
                latency_ms: started.elapsed().as_millis() as u64,
                diagnosis_id: None,
            },
        })
    }
}
