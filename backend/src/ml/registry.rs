use std::collections::BTreeMap;

use lazy_static::lazy_static;

use crate::ml::diseases;
use crate::ml::error::PipelineError;
use crate::ml::pipeline::{DiseasePipeline, PipelineContext, PipelineDescriptor};

pub type PipelineCtor = fn(&PipelineContext) -> Box<dyn DiseasePipeline>;

#[derive(Debug)]
pub struct RegistryEntry {
    pub descriptor: &'static PipelineDescriptor,
    pub construct: PipelineCtor,
}

/// Static mapping from disease key to pipeline constructor: the single
/// source of truth for which diseases this deployment supports. Listing and
/// health endpoints must derive from it rather than carrying their own
/// disease lists. BTreeMap keeps enumeration order stable.
pub struct Registry {
    entries: BTreeMap<&'static str, RegistryEntry>,
}

lazy_static! {
    static ref BUILTIN: Registry = Registry::with_entries(vec![
        RegistryEntry {
            descriptor: &diseases::brain_tumor::DESCRIPTOR,
            construct: diseases::brain_tumor::construct,
        },
        RegistryEntry {
            descriptor: &diseases::malaria::DESCRIPTOR,
            construct: diseases::malaria::construct,
        },
        RegistryEntry {
            descriptor: &diseases::malnutrition::DESCRIPTOR,
            construct: diseases::malnutrition::construct,
        },
        RegistryEntry {
            descriptor: &diseases::skin_cancer::DESCRIPTOR,
            construct: diseases::skin_cancer::construct,
        },
        RegistryEntry {
            descriptor: &diseases::tb::DESCRIPTOR,
            construct: diseases::tb::construct,
        },
    ]);
}

impl Registry {
    /// The process-wide registry of shipped diseases.
    pub fn builtin() -> &'static Registry {
        &BUILTIN
    }

    pub fn with_entries(entries: Vec<RegistryEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.descriptor.key, e))
                .collect(),
        }
    }

    pub fn resolve(&self, key: &str) -> Result<&RegistryEntry, PipelineError> {
        self.entries
            .get(key)
            .ok_or_else(|| PipelineError::UnknownDisease(key.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &'static PipelineDescriptor> + '_ {
        self.entries.values().map(|e| e.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
