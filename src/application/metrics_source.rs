// Source traits for live and archived metric data
use crate::domain::descriptor::MetricDescriptor;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Instance names reported for one metric. `None` for metrics without
/// instances.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricMeta {
    pub name: String,
    pub instances: Option<Vec<String>>,
}

/// Sent first, and again whenever the instance set or the time alignment
/// changes. The next sample row is for `timestamp_ms`, stamped by a source
/// whose clock read `now_ms` when it sent this message.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMeta {
    pub timestamp_ms: i64,
    pub now_ms: i64,
    pub metrics: Vec<MetricMeta>,
}

/// Raw values for one metric in one timestep. `None` means "unchanged since
/// the previous timestep".
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValues {
    Scalar(Option<f64>),
    Instances(Vec<Option<f64>>),
}

/// One timestep: one entry per metric, in descriptor order.
pub type SampleRow = Vec<MetricValues>;

#[derive(Debug, Clone, PartialEq)]
pub enum SourceMessage {
    Meta(SourceMeta),
    Samples(Vec<SampleRow>),
}

/// Push-based feed of current values. Dropping the receiver unsubscribes;
/// the source ends the feed by dropping its sender.
#[async_trait]
pub trait LiveSource: Send + Sync {
    async fn subscribe(
        &self,
        descriptor: &MetricDescriptor,
        interval_ms: i64,
    ) -> anyhow::Result<mpsc::Receiver<SourceMessage>>;
}

/// Historical values, one row per `step_ms` starting at `start_ms`, at most
/// `limit` rows, followed by the channel closing.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    async fn query(
        &self,
        descriptor: &MetricDescriptor,
        start_ms: i64,
        step_ms: i64,
        limit: u64,
    ) -> anyhow::Result<mpsc::Receiver<SourceMessage>>;
}

/// Archive source for deployments without archives: every query closes
/// without data.
#[derive(Debug, Clone, Default)]
pub struct NullArchiveSource;

#[async_trait]
impl ArchiveSource for NullArchiveSource {
    async fn query(
        &self,
        _descriptor: &MetricDescriptor,
        _start_ms: i64,
        _step_ms: i64,
        _limit: u64,
    ) -> anyhow::Result<mpsc::Receiver<SourceMessage>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}
