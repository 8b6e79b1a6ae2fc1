use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::ml::error::PipelineError;

/// Manifest read from a `model.json` artifact: the architecture tag is
/// informational, `output_dim` fixes the score vector width, and `seed`
/// keys the synthesized forward pass.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelManifest {
    pub arch: String,
    pub output_dim: usize,
    pub seed: u64,
}

/// Opaque model handle. The trained artifacts are placeholders in this
/// scaffold, so the forward pass synthesizes logits from a digest of the
/// prepared input instead of running a real engine; the same input always
/// yields the same scores. Swapping in a real runtime replaces this type
/// without touching the pipeline contract.
///
/// Immutable after `load`, safe for concurrent read-only use; inference may
/// run on a shared handle without serialization.
#[derive(Debug)]
pub struct ModelHandle {
    manifest: ModelManifest,
}

impl ModelHandle {
    pub fn load(path: &Path, disease: &str) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(path).map_err(|e| PipelineError::ModelLoad {
            disease: disease.to_string(),
            detail: format!("model artifact {}: {}", path.display(), e),
        })?;
        let manifest: ModelManifest =
            serde_json::from_str(&raw).map_err(|e| PipelineError::ModelLoad {
                disease: disease.to_string(),
                detail: format!("corrupt model artifact {}: {}", path.display(), e),
            })?;
        if manifest.output_dim == 0 {
            return Err(PipelineError::ModelLoad {
                disease: disease.to_string(),
                detail: format!("model artifact {} declares zero outputs", path.display()),
            });
        }
        log::debug!(
            "loaded model manifest for '{}': arch={}, output_dim={}",
            disease,
            manifest.arch,
            manifest.output_dim
        );
        Ok(Self { manifest })
    }

    pub fn output_dim(&self) -> usize {
        self.manifest.output_dim
    }

    /// Forward pass over a prepared, flattened input. Logits are drawn from
    /// an RNG seeded with SHA-256(manifest seed || input bytes).
    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        let mut hasher = Sha256::new();
        hasher.update(self.manifest.seed.to_le_bytes());
        for value in input {
            hasher.update(value.to_le_bytes());
        }
        let digest = hasher.finalize();
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);

        let mut rng = StdRng::from_seed(seed);
        (0..self.manifest.output_dim)
            .map(|_| rng.random_range(-4.0..4.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, output_dim: usize) -> std::path::PathBuf {
        let path = dir.join("model.json");
        std::fs::write(
            &path,
            format!(r#"{{"arch": "cnn-scaffold", "output_dim": {output_dim}, "seed": 7}}"#),
        )
        .unwrap();
        path
    }

    #[test]
    fn load_missing_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelHandle::load(&dir.path().join("model.json"), "malaria").unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad { .. }));
    }

    #[test]
    fn load_corrupt_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "{{{ definitely not json").unwrap();
        let err = ModelHandle::load(&path, "malaria").unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad { .. }));
    }

    #[test]
    fn forward_is_deterministic_per_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), 4);
        let model = ModelHandle::load(&path, "brain_tumor").unwrap();

        let a = model.forward(&[0.1, 0.2, 0.3]);
        let b = model.forward(&[0.1, 0.2, 0.3]);
        let c = model.forward(&[0.9, 0.2, 0.3]);
        assert_eq!(a.len(), 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
