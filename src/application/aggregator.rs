// Decodes source messages into summed, timestamped values
use crate::application::metrics_source::{MetricValues, SampleRow, SourceMessage, SourceMeta};
use crate::domain::descriptor::MetricDescriptor;

/// Turns the message stream of one source channel into `(timestamp_ms,
/// value)` pairs, where each value is the sum over all metrics and all
/// accepted instances, times the descriptor's factor. The value is NaN
/// until every accepted slot has reported once since the last metadata.
#[derive(Debug)]
pub struct ChannelAggregator {
    descriptor: MetricDescriptor,
    interval_ms: i64,
    instances: Vec<Option<Vec<String>>>,
    carried: Vec<Vec<Option<f64>>>,
    timestamp_ms: Option<i64>,
}

impl ChannelAggregator {
    pub fn new(descriptor: MetricDescriptor, interval_ms: i64) -> Self {
        Self {
            descriptor,
            interval_ms,
            instances: Vec::new(),
            carried: Vec::new(),
            timestamp_ms: None,
        }
    }

    pub fn handle(&mut self, message: SourceMessage, local_now_ms: i64) -> Vec<(i64, f64)> {
        match message {
            SourceMessage::Meta(meta) => {
                self.reset(meta, local_now_ms);
                Vec::new()
            }
            SourceMessage::Samples(rows) => self.samples(rows),
        }
    }

    fn reset(&mut self, meta: SourceMeta, local_now_ms: i64) {
        self.instances = self
            .descriptor
            .metrics()
            .iter()
            .map(|name| {
                meta.metrics
                    .iter()
                    .find(|m| &m.name == name)
                    .and_then(|m| m.instances.clone())
            })
            .collect();

        self.carried = self
            .instances
            .iter()
            .map(|inst| vec![None; inst.as_ref().map_or(1, |names| names.len())])
            .collect();

        self.timestamp_ms = Some(local_now_ms + (meta.timestamp_ms - meta.now_ms));
    }

    fn samples(&mut self, rows: Vec<SampleRow>) -> Vec<(i64, f64)> {
        let Some(mut timestamp) = self.timestamp_ms else {
            tracing::warn!(
                "Dropping {} sample rows received before channel metadata",
                rows.len()
            );
            return Vec::new();
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push((timestamp, self.row_value(row)));
            timestamp += self.interval_ms;
        }

        self.timestamp_ms = Some(timestamp);
        out
    }

    fn row_value(&mut self, row: &SampleRow) -> f64 {
        let filter = self.descriptor.instances();
        let mut sum = 0.0;

        for (i, values) in row.iter().enumerate().take(self.carried.len()) {
            let carried = &mut self.carried[i];
            match values {
                MetricValues::Scalar(value) => {
                    if carried.is_empty() {
                        carried.push(None);
                    }
                    if value.is_some() {
                        carried[0] = *value;
                    }
                    sum += carried[0].unwrap_or(f64::NAN);
                }
                MetricValues::Instances(values) => {
                    if carried.len() < values.len() {
                        carried.resize(values.len(), None);
                    }
                    for (j, value) in values.iter().enumerate() {
                        if value.is_some() {
                            carried[j] = *value;
                        }
                    }

                    let names = self.instances[i].as_deref();
                    for (j, v) in carried.iter().enumerate() {
                        let accepted = names
                            .and_then(|names| names.get(j))
                            .is_none_or(|name| filter.accepts(name));
                        if accepted {
                            sum += v.unwrap_or(f64::NAN);
                        }
                    }
                }
            }
        }

        sum * self.descriptor.factor()
    }
}
