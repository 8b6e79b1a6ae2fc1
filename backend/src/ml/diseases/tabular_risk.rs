use std::collections::BTreeMap;
use std::time::Instant;

use shared::{InferenceMeta, InferenceResponse};

use crate::ml::error::PipelineError;
use crate::ml::model::ModelHandle;
use crate::ml::pipeline::{
    check_payload_kind, DiseasePipeline, InferencePayload, PipelineContext, PipelineDescriptor,
};
use crate::ml::postproc::{argmax, load_labels, softmax};
use crate::ml::preproc::{prepare_tabular, FittedScaler};

struct LoadedState {
    model: ModelHandle,
    scaler: FittedScaler,
    tiers: Vec<String>,
}

/// Tabular-kind pipeline: named numeric features pass through a fitted
/// scaler and a classifier whose classes are ordinal risk tiers. The label
/// file carries the tier names in ascending severity.
pub struct TabularRiskPipeline {
    descriptor: &'static PipelineDescriptor,
    ctx: PipelineContext,
    state: Option<LoadedState>,
}

impl TabularRiskPipeline {
    pub fn new(descriptor: &'static PipelineDescriptor, ctx: &PipelineContext) -> Self {
        Self {
            descriptor,
            ctx: ctx.clone(),
            state: None,
        }
    }

    fn loaded(&self) -> Result<&LoadedState, PipelineError> {
        self.state
            .as_ref()
            .ok_or_else(|| PipelineError::NotLoaded(self.descriptor.key.to_string()))
    }
}

impl DiseasePipeline for TabularRiskPipeline {
    fn descriptor(&self) -> &PipelineDescriptor {
        self.descriptor
    }

    fn load(&mut self) -> Result<(), PipelineError> {
        if self.state.is_some() {
            return Ok(());
        }
        let key = self.descriptor.key;
        let version = self.descriptor.version;
        let model = ModelHandle::load(&self.ctx.artifact_path(key, version, "model.json"), key)?;
        let scaler =
            FittedScaler::from_file(&self.ctx.artifact_path(key, version, "scaler.json"), key)?;
        let tiers = load_labels(&self.ctx.label_path(key), key)?;
        if tiers.len() != model.output_dim() {
            return Err(PipelineError::LabelMismatch {
                disease: key.to_string(),
                labels: tiers.len(),
                outputs: model.output_dim(),
            });
        }
        self.state = Some(LoadedState {
            model,
            scaler,
            tiers,
        });
        Ok(())
    }

    fn infer(&self, payload: &InferencePayload) -> Result<InferenceResponse, PipelineError> {
        let started = Instant::now();
        let state = self.loaded()?;
        check_payload_kind(self.descriptor, payload)?;
        let InferencePayload::Tabular { features } = payload else {
            unreachable!("kind checked above");
        };

        let scaled = prepare_tabular(features, &state.scaler)?;
        let input: Vec<f32> = scaled.iter().map(|v| *v as f32).collect();
        let logits = state.model.forward(&input);
        let probs = softmax(&logits);
        let idx = argmax(&probs).ok_or_else(|| PipelineError::ModelLoad {
            disease: self.descriptor.key.to_string(),
            detail: "model produced an empty score vector".to_string(),
        })?;

        let prob_map: BTreeMap<String, f32> = state
            .tiers
            .iter()
            .cloned()
            .zip(probs.iter().copied())
            .collect();

        Ok(InferenceResponse {
            label: state.tiers[idx].clone(),
            probs: prob_map,
            meta: InferenceMeta {
                version: self.descriptor.version.to_string(),
                latency_ms: started.elapsed().as_millis() as u64,
                diagnosis_id: None,
            },
        })
    }
}
