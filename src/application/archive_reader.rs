// Paginated reads from an archive source
use crate::application::aggregator::ChannelAggregator;
use crate::application::clock::Clock;
use crate::application::metrics_source::{ArchiveSource, SourceMessage};
use crate::domain::descriptor::MetricDescriptor;
use crate::domain::sample::Sample;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Number of rows needed to cover `[start_ms, end_ms]` at `step_ms`.
pub fn archive_limit(start_ms: i64, end_ms: i64, step_ms: i64) -> u64 {
    if end_ms <= start_ms || step_ms <= 0 {
        return 0;
    }
    ((end_ms - start_ms) as f64 / step_ms as f64).ceil() as u64
}

pub struct ArchiveReader {
    source: Arc<dyn ArchiveSource>,
    descriptor: MetricDescriptor,
    lookup_step_ms: i64,
    clock: Arc<dyn Clock>,
    seen_data: Arc<Mutex<Option<bool>>>,
    availability: OnceCell<bool>,
}

impl ArchiveReader {
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        descriptor: MetricDescriptor,
        lookup_step_ms: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            descriptor,
            lookup_step_ms,
            clock,
            seen_data: Arc::new(Mutex::new(None)),
            availability: OnceCell::new(),
        }
    }

    /// Whether the archive holds any data for this descriptor. The first call
    /// sends a one-row query; the answer is kept from then on.
    pub async fn has_archives(&self) -> bool {
        *self
            .availability
            .get_or_init(|| async {
                let known = *self.seen_data.lock();
                if let Some(known) = known {
                    return known;
                }

                let found = self.lookup_archive().await;
                let mut seen = self.seen_data.lock();
                let result = found || seen.unwrap_or(false);
                *seen = Some(result);
                result
            })
            .await
    }

    async fn lookup_archive(&self) -> bool {
        let mut rx = match self
            .source
            .query(&self.descriptor, 0, self.lookup_step_ms, 1)
            .await
        {
            Ok(rx) => rx,
            Err(err) => {
                tracing::debug!(
                    "Archive lookup for {:?} failed: {:#}",
                    self.descriptor.metrics(),
                    err
                );
                return false;
            }
        };

        while let Some(message) = rx.recv().await {
            if let SourceMessage::Samples(rows) = message {
                if !rows.is_empty() {
                    return true;
                }
            }
        }
        false
    }

    /// Streams archived samples from `start_ms` to `end_ms` in ascending
    /// batches. Samples past `end_ms` are cut off. A failing or empty source
    /// gives an empty stream. NaN values are dropped. A non-empty batch marks
    /// archives as available.
    pub fn query(&self, start_ms: i64, end_ms: i64, step_ms: i64) -> BoxStream<'static, Vec<Sample>> {
        let limit = archive_limit(start_ms, end_ms, step_ms);
        if limit == 0 {
            return stream::empty().boxed();
        }

        let source = self.source.clone();
        let descriptor = self.descriptor.clone();
        let clock = self.clock.clone();
        let seen_data = self.seen_data.clone();

        async_stream::stream! {
            tracing::debug!(
                "Archive query for {:?}: start={} step={} limit={}",
                descriptor.metrics(), start_ms, step_ms, limit
            );

            let mut rx = match source.query(&descriptor, start_ms, step_ms, limit).await {
                Ok(rx) => rx,
                Err(err) => {
                    tracing::warn!("Archive query for {:?} failed: {:#}", descriptor.metrics(), err);
                    return;
                }
            };

            let mut aggregator = ChannelAggregator::new(descriptor.clone(), step_ms);
            while let Some(message) = rx.recv().await {
                let batch: Vec<Sample> = aggregator
                    .handle(message, clock.now_ms())
                    .into_iter()
                    .take_while(|(t, _)| *t <= end_ms)
                    .filter(|(_, v)| !v.is_nan())
                    .map(|(t, v)| Sample::new(t, v))
                    .collect();
                if !batch.is_empty() {
                    *seen_data.lock() = Some(true);
                    yield batch;
                }
            }
        }
        .boxed()
    }
}
