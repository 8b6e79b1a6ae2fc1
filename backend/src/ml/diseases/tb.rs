use shared::InputKind;

use crate::ml::diseases::image_classifier::ImageClassifierPipeline;
use crate::ml::pipeline::{DiseasePipeline, PipelineContext, PipelineDescriptor};
use crate::ml::preproc::ChannelMode;

/// Chest x-ray screen, normal vs. tuberculosis.
pub static DESCRIPTOR: PipelineDescriptor = PipelineDescriptor {
    key: "tb",
    display_name: "Tuberculosis",
    input_kind: InputKind::Image,
    version: "v1",
};

pub fn construct(ctx: &PipelineContext) -> Box<dyn DiseasePipeline> {
    Box::new(ImageClassifierPipeline::new(
        &DESCRIPTOR,
        ctx,
        (256, 256),
        ChannelMode::Grayscale,
    ))
}
