use shared::InputKind;

use crate::ml::diseases::image_classifier::ImageClassifierPipeline;
use crate::ml::pipeline::{DiseasePipeline, PipelineContext, PipelineDescriptor};
use crate::ml::preproc::ChannelMode;

/// MRI classifier over glioma/meningioma/pituitary/no-tumor. MRI scans are
/// single-channel, so the preprocessing path converts to grayscale.
pub static DESCRIPTOR: PipelineDescriptor = PipelineDescriptor {
    key: "brain_tumor",
    display_name: "Brain Tumor",
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
