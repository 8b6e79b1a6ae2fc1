use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::ml::error::PipelineError;
use crate::ml::pipeline::{DiseasePipeline, PipelineContext};
use crate::ml::registry::Registry;

/// Process-scoped cache of loaded pipelines, keyed by disease. Instances
/// are created lazily, loaded exactly once, and never evicted for the
/// process lifetime. Handed to request handlers via `web::Data` rather
/// than living in a global.
pub struct PipelineDispatcher {
    registry: &'static Registry,
    ctx: PipelineContext,
    ready: RwLock<HashMap<&'static str, Arc<dyn DiseasePipeline>>>,
    // One guard per key, held only across the load critical section so a
    // slow load of one disease never blocks inference on another.
    load_guards: Mutex<HashMap<&'static str, Arc<Mutex<()>>>>,
}

impl PipelineDispatcher {
    pub fn new(registry: &'static Registry, ctx: PipelineContext) -> Self {
        Self {
            registry,
            ctx,
            ready: RwLock::new(HashMap::new()),
            load_guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &'static Registry {
        self.registry
    }

    /// Resolves a disease key to its loaded pipeline. On the first call for
    /// a key this constructs and loads the pipeline; concurrent first
    /// callers serialize on a per-key guard so exactly one `load()` runs.
    /// A failed load caches nothing and the next call retries.
    pub fn get(&self, key: &str) -> Result<Arc<dyn DiseasePipeline>, PipelineError> {
        let entry = self.registry.resolve(key)?;
        let key = entry.descriptor.key;

        if let Some(pipeline) = self.read_ready(key) {
            return Ok(pipeline);
        }

        let guard = self.load_guard(key);
        let _held = guard.lock().unwrap_or_else(PoisonError::into_inner);

        // A concurrent caller may have finished the load while we waited.
        if let Some(pipeline) = self.read_ready(key) {
            return Ok(pipeline);
        }

        let mut pipeline = (entry.construct)(&self.ctx);
        if let Err(e) = pipeline.load() {
            log::error!("pipeline '{}' failed to load: {}", key, e);
            return Err(e);
        }
        log::info!(
            "pipeline '{}' loaded (version {})",
            key,
            entry.descriptor.version
        );

        let pipeline: Arc<dyn DiseasePipeline> = Arc::from(pipeline);
        self.ready
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Eagerly attempts every registered pipeline, tolerating failures;
    /// lazy retry semantics still apply to anything that did not come up.
    pub fn warm_up(&self) -> usize {
        let mut ready = 0;
        for key in self.registry.keys() {
            match self.get(key) {
                Ok(_) => ready += 1,
                Err(e) => log::warn!("warm-up skipped '{}': {}", key, e),
            }
        }
        log::info!("{}/{} pipelines ready after warm-up", ready, self.registry.len());
        ready
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.ready
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn read_ready(&self, key: &str) -> Option<Arc<dyn DiseasePipeline>> {
        self.ready
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn load_guard(&self, key: &'static str) -> Arc<Mutex<()>> {
        self.load_guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::pipeline::{InferencePayload, PipelineDescriptor};
    use crate::ml::registry::RegistryEntry;
    use lazy_static::lazy_static;
    use shared::{InferenceMeta, InferenceResponse, InputKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    static COUNTED_DESCRIPTOR: PipelineDescriptor = PipelineDescriptor {
        key: "counted",
        display_name: "Counted",
        input_kind: InputKind::Image,
        version: "v1",
    };
    static FLAKY_DESCRIPTOR: PipelineDescriptor = PipelineDescriptor {
        key: "flaky",
        display_name: "Flaky",
        input_kind: InputKind::Image,
        version: "v1",
    };

    static COUNTED_LOADS: AtomicUsize = AtomicUsize::new(0);
    static FLAKY_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

    struct StubPipeline {
        descriptor: &'static PipelineDescriptor,
        marker_required: bool,
        ctx: PipelineContext,
        loaded: bool,
    }

    impl DiseasePipeline for StubPipeline {
        fn descriptor(&self) -> &PipelineDescriptor {
            self.descriptor
        }

        fn load(&mut self) -> Result<(), PipelineError> {
            if self.descriptor.key == "counted" {
                // Widen the race window so concurrent callers pile up.
                thread::sleep(Duration::from_millis(30));
                COUNTED_LOADS.fetch_add(1, Ordering::SeqCst);
            } else {
                FLAKY_ATTEMPTS.fetch_add(1, Ordering::SeqCst);
            }
            if self.marker_required && !self.ctx.model_root.join("artifact.ok").exists() {
                return Err(PipelineError::ModelLoad {
                    disease: self.descriptor.key.to_string(),
                    detail: "artifact missing".to_string(),
                });
            }
            self.loaded = true;
            Ok(())
        }

        fn infer(&self, _payload: &InferencePayload) -> Result<InferenceResponse, PipelineError> {
            if !self.loaded {
                return Err(PipelineError::NotLoaded(self.descriptor.key.to_string()));
            }
            Ok(InferenceResponse {
                label: "stub".to_string(),
                probs: Default::default(),
                meta: InferenceMeta {
                    version: "v1".to_string(),
                    latency_ms: 0,
                    diagnosis_id: None,
                },
            })
        }
    }

    fn counted_ctor(ctx: &PipelineContext) -> Box<dyn DiseasePipeline> {
        Box::new(StubPipeline {
            descriptor: &COUNTED_DESCRIPTOR,
            marker_required: false,
            ctx: ctx.clone(),
            loaded: false,
        })
    }

    fn flaky_ctor(ctx: &PipelineContext) -> Box<dyn DiseasePipeline> {
        Box::new(StubPipeline {
            descriptor: &FLAKY_DESCRIPTOR,
            marker_required: true,
            ctx: ctx.clone(),
            loaded: false,
        })
    }

    lazy_static! {
        static ref TEST_REGISTRY: Registry = Registry::with_entries(vec![
            RegistryEntry {
                descriptor: &COUNTED_DESCRIPTOR,
                construct: counted_ctor,
            },
            RegistryEntry {
                descriptor: &FLAKY_DESCRIPTOR,
                construct: flaky_ctor,
            },
        ]);
    }

    #[test]
    fn concurrent_first_access_loads_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(PipelineDispatcher::new(
            &TEST_REGISTRY,
            PipelineContext::new(dir.path()),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = dispatcher.clone();
                thread::spawn(move || d.get("counted").unwrap())
            })
            .collect();
        let pipelines: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(COUNTED_LOADS.load(Ordering::SeqCst), 1);
        for pair in pipelines.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
        assert!(dispatcher.is_loaded("counted"));
    }

    #[test]
    fn failed_load_is_not_cached_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher =
            PipelineDispatcher::new(&TEST_REGISTRY, PipelineContext::new(dir.path()));

        let err = dispatcher.get("flaky").unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad { .. }));
        assert!(!dispatcher.is_loaded("flaky"));
        let first_attempts = FLAKY_ATTEMPTS.load(Ordering::SeqCst);

        // The artifact shows up; the next request loads without a restart.
        std::fs::write(dir.path().join("artifact.ok"), b"ok").unwrap();
        let pipeline = dispatcher.get("flaky").unwrap();
        assert!(FLAKY_ATTEMPTS.load(Ordering::SeqCst) > first_attempts);
        assert!(dispatcher.is_loaded("flaky"));

        // Cached from here on: no further load attempts.
        let attempts_after_success = FLAKY_ATTEMPTS.load(Ordering::SeqCst);
        let again = dispatcher.get("flaky").unwrap();
        assert_eq!(FLAKY_ATTEMPTS.load(Ordering::SeqCst), attempts_after_success);
        assert!(Arc::ptr_eq(&pipeline, &again));
    }

    #[test]
    fn unknown_key_is_rejected_before_any_construction() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher =
            PipelineDispatcher::new(&TEST_REGISTRY, PipelineContext::new(dir.path()));
        assert!(matches!(
            dispatcher.get("nonexistent").unwrap_err(),
            PipelineError::UnknownDisease(_)
        ));
    }
}
