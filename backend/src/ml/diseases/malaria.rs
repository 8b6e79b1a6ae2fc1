use shared::InputKind;

use crate::ml::diseases::image_classifier::ImageClassifierPipeline;
use crate::ml::pipeline::{DiseasePipeline, PipelineContext, PipelineDescriptor};
use crate::ml::preproc::ChannelMode;

/// Blood-smear cell classifier, parasitized vs. uninfected.
pub static DESCRIPTOR: PipelineDescriptor = PipelineDescriptor {
    key: "malaria",
    display_name: "Malaria",
    input_kind: InputKind::Image,
    version: "v1",
};

pub fn construct(ctx: &PipelineContext) -> Box<dyn DiseasePipeline> {
    Box::new(ImageClassifierPipeline::new(
        &DESCRIPTOR,
        ctx,
        (128, 128),
        ChannelMode::Rgb,
    ))
}
