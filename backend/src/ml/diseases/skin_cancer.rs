use shared::InputKind;

use crate::ml::diseases::image_classifier::ImageClassifierPipeline;
use crate::ml::pipeline::{DiseasePipeline, PipelineContext, PipelineDescriptor};
use crate::ml::preproc::ChannelMode;

/// Dermatoscopic lesion classifier, nine classes.
pub static DESCRIPTOR: PipelineDescriptor = PipelineDescriptor {
    key: "skin_cancer",
    display_name: "Skin Cancer",
    input_kind: InputKind::Image,
    version: "v1",
};

pub fn construct(ctx: &PipelineContext) -> Box<dyn DiseasePipeline> {
    Box::new(ImageClassifierPipeline::new(
        &DESCRIPTOR,
        ctx,
        (224, 224),
        ChannelMode::Rgb,
    ))
}
