// Fake sources and clock shared by unit tests
use crate::application::clock::Clock;
use crate::application::metrics_source::{
    ArchiveSource, LiveSource, MetricMeta, MetricValues, SourceMessage, SourceMeta,
};
use crate::domain::descriptor::MetricDescriptor;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, watch};

pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Metadata for a single scalar metric, aligned so that the next row lands
/// exactly on `timestamp_ms` whatever the local clock says.
pub fn scalar_meta(name: &str, timestamp_ms: i64, clock: &dyn Clock) -> SourceMessage {
    SourceMessage::Meta(SourceMeta {
        timestamp_ms,
        now_ms: clock.now_ms(),
        metrics: vec![MetricMeta {
            name: name.to_string(),
            instances: None,
        }],
    })
}

pub fn scalar_rows(values: &[f64]) -> SourceMessage {
    SourceMessage::Samples(
        values
            .iter()
            .map(|v| vec![MetricValues::Scalar(Some(*v))])
            .collect(),
    )
}

/// Archive that replays a fixed script on every query, ignoring the query
/// range. Messages are built lazily so metadata can be aligned against the
/// clock at query time.
pub struct ScriptedArchive {
    script: Vec<ScriptStep>,
    clock: Arc<dyn Clock>,
    hold: Option<watch::Receiver<bool>>,
    queries: AtomicUsize,
    last_limit: Mutex<Option<u64>>,
}

#[derive(Clone)]
pub enum ScriptStep {
    Meta(i64),
    Rows(Vec<f64>),
}

impl ScriptedArchive {
    pub fn new(script: Vec<ScriptStep>, clock: Arc<dyn Clock>) -> Self {
        Self {
            script,
            clock,
            hold: None,
            queries: AtomicUsize::new(0),
            last_limit: Mutex::new(None),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Arc::new(ManualClock::new(0)))
    }

    /// Contiguous rows starting at `start_ms`, sent as one batch.
    pub fn with_values(start_ms: i64, values: &[f64]) -> Self {
        Self::new(
            vec![ScriptStep::Meta(start_ms), ScriptStep::Rows(values.to_vec())],
            Arc::new(ManualClock::new(0)),
        )
    }

    /// Holds back every query's script until `true` is sent on the returned
    /// gate. Queries made after the release replay at once.
    pub fn held(mut self) -> (Self, watch::Sender<bool>) {
        let (gate, hold) = watch::channel(false);
        self.hold = Some(hold);
        (self, gate)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn last_limit(&self) -> Option<u64> {
        *self.last_limit.lock()
    }
}

#[async_trait]
impl ArchiveSource for ScriptedArchive {
    async fn query(
        &self,
        descriptor: &MetricDescriptor,
        _start_ms: i64,
        _step_ms: i64,
        limit: u64,
    ) -> anyhow::Result<mpsc::Receiver<SourceMessage>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        *self.last_limit.lock() = Some(limit);

        let name = descriptor.metrics()[0].clone();
        let messages: Vec<SourceMessage> = self
            .script
            .iter()
            .map(|step| match step {
                ScriptStep::Meta(t) => scalar_meta(&name, *t, self.clock.as_ref()),
                ScriptStep::Rows(values) => scalar_rows(values),
            })
            .collect();
        let hold = self.hold.clone();

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            if let Some(mut hold) = hold {
                if hold.wait_for(|released| *released).await.is_err() {
                    return;
                }
            }
            for message in messages {
                if tx.send(message).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// Live source whose feeds stay open but never deliver anything; tests push
/// into the sampler directly.
#[derive(Default)]
pub struct SilentLive {
    senders: Mutex<Vec<mpsc::Sender<SourceMessage>>>,
}

impl SilentLive {
    /// Ends every feed handed out so far.
    pub fn close_all(&self) {
        self.senders.lock().clear();
    }

    pub fn subscriptions(&self) -> usize {
        self.senders.lock().len()
    }

    /// Feeds whose receiving side is still alive.
    pub fn open_feeds(&self) -> usize {
        self.senders.lock().iter().filter(|tx| !tx.is_closed()).count()
    }
}

#[async_trait]
impl LiveSource for SilentLive {
    async fn subscribe(
        &self,
        _descriptor: &MetricDescriptor,
        _interval_ms: i64,
    ) -> anyhow::Result<mpsc::Receiver<SourceMessage>> {
        let (tx, rx) = mpsc::channel(16);
        self.senders.lock().push(tx);
        Ok(rx)
    }
}

/// Lets spawned tasks run until `done` holds, giving up after a while.
pub async fn settle(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    done()
}
