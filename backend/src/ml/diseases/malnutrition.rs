use shared::InputKind;

use crate::ml::diseases::tabular_risk::TabularRiskPipeline;
use crate::ml::pipeline::{DiseasePipeline, PipelineContext, PipelineDescriptor};

/// Anthropometric risk classifier over four ordinal tiers
/// (Low / Moderate / High / Very High). Expects the five features the
/// scaler was fitted on: Stunting, Wasting, Underweight, Overweight,
/// U5_Pop_Thousands.
pub static DESCRIPTOR: PipelineDescriptor = PipelineDescriptor {
    key: "malnutrition",
    display_name: "Malnutrition",
    input_kind: InputKind::Tabular,
    version: "v1",
};

pub fn construct(ctx: &PipelineContext) -> Box<dyn DiseasePipeline> {
    Box::new(TabularRiskPipeline::new(&DESCRIPTOR, ctx))
}
