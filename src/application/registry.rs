// Shared samplers keyed by descriptor
use crate::application::clock::Clock;
use crate::application::metrics_source::{ArchiveSource, LiveSource};
use crate::application::sampler::{MetricsSampler, SamplerConfig};
use crate::domain::descriptor::MetricDescriptor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Hands out one sampler per descriptor. Entries are weak: a sampler goes
/// away with the last plot using it, and the next request starts a new one.
pub struct SamplerRegistry {
    live: Arc<dyn LiveSource>,
    archive: Arc<dyn ArchiveSource>,
    clock: Arc<dyn Clock>,
    config: SamplerConfig,
    samplers: Mutex<HashMap<MetricDescriptor, Weak<MetricsSampler>>>,
}

impl SamplerRegistry {
    pub fn new(
        live: Arc<dyn LiveSource>,
        archive: Arc<dyn ArchiveSource>,
        clock: Arc<dyn Clock>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            live,
            archive,
            clock,
            config,
            samplers: Mutex::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn get_or_create(&self, descriptor: &MetricDescriptor) -> Arc<MetricsSampler> {
        let mut samplers = self.samplers.lock();
        if let Some(sampler) = samplers.get(descriptor).and_then(Weak::upgrade) {
            return sampler;
        }

        tracing::debug!(
            "Starting sampler for {:?} on {}",
            descriptor.metrics(),
            descriptor.host().unwrap_or("localhost")
        );
        let sampler = MetricsSampler::spawn(
            descriptor.clone(),
            self.live.clone(),
            self.archive.clone(),
            self.clock.clone(),
            self.config,
        );
        samplers.insert(descriptor.clone(), Arc::downgrade(&sampler));
        sampler
    }

    /// Forgets samplers that are no longer used.
    pub fn prune(&self) {
        self.samplers.lock().retain(|_, sampler| sampler.strong_count() > 0);
    }

    /// Number of samplers still alive.
    pub fn len(&self) -> usize {
        self.samplers
            .lock()
            .values()
            .filter(|sampler| sampler.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
