// Per-descriptor sampler: live ring buffer plus archive access
use crate::application::aggregator::ChannelAggregator;
use crate::application::archive_reader::ArchiveReader;
use crate::application::clock::Clock;
use crate::application::fill::{FillHandle, FillPlan, Splicer, fill_live_region, spawn_archive_fill};
use crate::application::metrics_source::{ArchiveSource, LiveSource};
use crate::application::ring_buffer::{DEFAULT_CAPACITY, DEFAULT_INTERVAL_MS, RingBuffer};
use crate::domain::descriptor::MetricDescriptor;
use crate::domain::sample::SeriesBuffer;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    pub capacity: usize,
    pub interval_ms: i64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

pub struct MetricsSampler {
    descriptor: MetricDescriptor,
    ring: Arc<Mutex<RingBuffer>>,
    archive: ArchiveReader,
    clock: Arc<dyn Clock>,
    feed: AbortHandle,
}

impl MetricsSampler {
    /// Creates the sampler and starts its live feed. Must be called from
    /// within a tokio runtime.
    pub fn spawn(
        descriptor: MetricDescriptor,
        live: Arc<dyn LiveSource>,
        archive: Arc<dyn ArchiveSource>,
        clock: Arc<dyn Clock>,
        config: SamplerConfig,
    ) -> Arc<Self> {
        let ring = Arc::new(Mutex::new(RingBuffer::new(config.capacity, config.interval_ms)));
        let interval_ms = config.interval_ms;

        let feed = tokio::spawn({
            let descriptor = descriptor.clone();
            let ring = ring.clone();
            let clock = clock.clone();
            async move {
                let mut rx = match live.subscribe(&descriptor, interval_ms).await {
                    Ok(rx) => rx,
                    Err(err) => {
                        tracing::warn!(
                            "Live subscription for {:?} failed: {:#}",
                            descriptor.metrics(),
                            err
                        );
                        ring.lock().close();
                        return;
                    }
                };

                let mut aggregator = ChannelAggregator::new(descriptor.clone(), interval_ms);
                while let Some(message) = rx.recv().await {
                    let values = aggregator.handle(message, clock.now_ms());
                    let mut buffer = ring.lock();
                    for (timestamp_ms, value) in values {
                        buffer.push(timestamp_ms, value);
                    }
                }

                tracing::info!("Live feed for {:?} closed", descriptor.metrics());
                ring.lock().close();
            }
        })
        .abort_handle();

        Arc::new(Self {
            archive: ArchiveReader::new(archive, descriptor.clone(), interval_ms, clock.clone()),
            descriptor,
            ring,
            clock,
            feed,
        })
    }

    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    pub fn interval_ms(&self) -> i64 {
        self.ring.lock().interval_ms()
    }

    /// Records a live value directly.
    pub fn push(&self, timestamp_ms: i64, value: f64) {
        self.ring.lock().push(timestamp_ms, value);
    }

    /// False once the live feed has ended.
    pub fn is_live(&self) -> bool {
        !self.ring.lock().is_closed()
    }

    pub fn sample_real_time(&self, t1_ms: i64, t2_ms: i64) -> Option<f64> {
        self.ring.lock().sample_real_time(t1_ms, t2_ms)
    }

    pub async fn has_archives(&self) -> bool {
        self.archive.has_archives().await
    }

    /// Fills `buffer` with the window `[plot_start_ms, plot_end_ms]`.
    ///
    /// The live part is written before this returns. The archive part, if
    /// any, is spliced in front of it by the returned fill.
    pub fn fill(&self, buffer: &SeriesBuffer, plot_start_ms: i64, plot_end_ms: i64, step_ms: i64) -> FillHandle {
        let plan = {
            let ring = self.ring.lock();
            let plan = FillPlan::new(
                plot_start_ms,
                plot_end_ms,
                step_ms,
                ring.oldest_ms(),
                self.clock.now_ms(),
            );

            let mut series = buffer.lock();
            fill_live_region(&mut series, plan.real_time_start_ms, plot_end_ms, step_ms, |t1, t2| {
                ring.sample_real_time(t1, t2)
            });
            plan
        };

        if plan.archive_limit() == 0 {
            return FillHandle::completed(buffer.clone());
        }

        tracing::debug!(
            "Filling {:?} from archive: {}..{} step {}",
            self.descriptor.metrics(),
            plan.archive_start_ms,
            plan.archive_end_ms,
            step_ms
        );
        let batches = self
            .archive
            .query(plan.archive_start_ms, plan.archive_end_ms, step_ms);
        spawn_archive_fill(buffer.clone(), Splicer::new(&plan), batches)
    }
}

impl Drop for MetricsSampler {
    fn drop(&mut self) {
        self.feed.abort();
    }
}
