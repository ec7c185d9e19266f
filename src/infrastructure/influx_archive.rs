// InfluxDB archive source
use crate::application::clock::Clock;
use crate::application::metrics_source::{
    ArchiveSource, MetricMeta, MetricValues, SampleRow, SourceMessage, SourceMeta,
};
use crate::domain::descriptor::{Derive, MetricDescriptor};
use crate::infrastructure::config::InfluxSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sample rows per message, so long fills arrive in pages.
const PAGE_ROWS: usize = 250;

const INSTANCE_TAG: &str = "instance";

/// Reads archived metrics through the InfluxQL HTTP API. Each metric is a
/// measurement with a `value` field, tagged with `host` and, for metrics
/// with instances, `instance`.
pub struct InfluxArchiveSource {
    host: String,
    token: String,
    database: String,
    retention_policy: String,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    results: Vec<InfluxQLResult>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    statement_id: Option<usize>,
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    columns: Vec<String>,
    values: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
}

impl InfluxArchiveSource {
    pub fn new(settings: &InfluxSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            host: settings.host.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            database: settings.database.clone(),
            retention_policy: settings.retention_policy.clone(),
            client: reqwest::Client::new(),
            clock,
        }
    }

    fn build_query_url(&self, query: &str) -> String {
        format!(
            "{}/query?db={}&rp={}&epoch=ms&q={}",
            self.host,
            urlencoding::encode(&self.database),
            urlencoding::encode(&self.retention_policy),
            urlencoding::encode(query)
        )
    }

    async fn execute_query(&self, query: &str) -> Result<InfluxQLResponse> {
        let url = self.build_query_url(query);
        tracing::debug!("Executing InfluxQL: {}", query);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        if let Some(error) = data.results.iter().find_map(|r| r.error.as_ref()) {
            anyhow::bail!("InfluxDB query error: {}", error);
        }

        Ok(data)
    }

    /// Earliest archived timestamp at or after `start_ms`, over all metrics.
    async fn first_time(&self, descriptor: &MetricDescriptor, start_ms: i64) -> Result<Option<i64>> {
        let response = self.execute_query(&first_time_query(descriptor, start_ms)).await?;
        Ok(response
            .results
            .iter()
            .flat_map(|r| r.series.iter().flatten())
            .flat_map(|s| s.values.iter().filter_map(|row| row.first().and_then(parse_time)))
            .min())
    }
}

#[async_trait]
impl ArchiveSource for InfluxArchiveSource {
    /// Replays from the first record at or after `start_ms`, aligned to the
    /// step, like an archive that begins later than the requested time. When
    /// that record lies past the requested range the whole window moves to
    /// it, keeping `limit`.
    async fn query(
        &self,
        descriptor: &MetricDescriptor,
        start_ms: i64,
        step_ms: i64,
        limit: u64,
    ) -> Result<mpsc::Receiver<SourceMessage>> {
        if step_ms <= 0 || limit == 0 {
            let (_tx, rx) = mpsc::channel(1);
            return Ok(rx);
        }

        let end_ms = start_ms.saturating_add(step_ms.saturating_mul(limit as i64));
        let Some(first) = self.first_time(descriptor, start_ms).await? else {
            tracing::debug!("No archived data for {:?} from {}", descriptor.metrics(), start_ms);
            let (_tx, rx) = mpsc::channel(1);
            return Ok(rx);
        };
        let first_ms = start_ms + (first.max(start_ms) - start_ms) / step_ms * step_ms;
        let (start_ms, limit) = if first_ms < end_ms {
            (first_ms, ((end_ms - first_ms) / step_ms) as u64)
        } else {
            tracing::debug!(
                "Archive for {:?} starts at {}, after {}; replaying from there",
                descriptor.metrics(),
                first_ms,
                end_ms
            );
            (first_ms, limit)
        };

        let response = self
            .execute_query(&series_query(descriptor, start_ms, step_ms, limit))
            .await?;
        let messages = messages_from_response(
            descriptor,
            &response,
            start_ms,
            step_ms,
            limit,
            self.clock.now_ms(),
        );

        let (tx, rx) = mpsc::channel(messages.len().max(1));
        for message in messages {
            // The channel has room for every message.
            let _ = tx.try_send(message);
        }
        Ok(rx)
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn host_clause(descriptor: &MetricDescriptor) -> String {
    match descriptor.host() {
        Some(host) => format!(" AND \"host\" = {}", quote_literal(host)),
        None => String::new(),
    }
}

pub fn first_time_query(descriptor: &MetricDescriptor, start_ms: i64) -> String {
    let measurements: Vec<String> = descriptor
        .metrics()
        .iter()
        .map(|m| quote_identifier(m))
        .collect();
    format!(
        "SELECT first(\"value\") FROM {} WHERE time >= {}ms{}",
        measurements.join(", "),
        start_ms,
        host_clause(descriptor)
    )
}

/// One statement per metric, bucketed at `step_ms` and grouped by instance.
/// Counters are turned into per-second rates.
pub fn series_query(descriptor: &MetricDescriptor, start_ms: i64, step_ms: i64, limit: u64) -> String {
    let end_ms = start_ms + step_ms * limit as i64;
    let field = match descriptor.derive() {
        Derive::Raw => "mean(\"value\")".to_string(),
        Derive::Rate => "non_negative_derivative(mean(\"value\"), 1s)".to_string(),
    };

    descriptor
        .metrics()
        .iter()
        .map(|metric| {
            format!(
                "SELECT {} FROM {} WHERE time >= {}ms AND time < {}ms{} GROUP BY time({}ms), {} fill(none)",
                field,
                quote_identifier(metric),
                start_ms,
                end_ms,
                host_clause(descriptor),
                step_ms,
                quote_identifier(INSTANCE_TAG)
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn parse_time(value: &serde_json::Value) -> Option<i64> {
    if let Some(ms) = value.as_i64() {
        return Some(ms);
    }
    value
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.timestamp_millis())
}

/// Per-metric table of bucket index to per-instance values.
struct MetricTable {
    instances: Option<Vec<String>>,
    values: BTreeMap<u64, Vec<Option<f64>>>,
}

fn metric_table(series: &[InfluxQLSeries], start_ms: i64, step_ms: i64, limit: u64) -> MetricTable {
    let names: BTreeSet<String> = series
        .iter()
        .filter_map(|s| s.tags.as_ref()?.get(INSTANCE_TAG))
        .filter(|name| !name.is_empty())
        .cloned()
        .collect();
    let instances: Option<Vec<String>> = if names.is_empty() {
        None
    } else {
        Some(names.into_iter().collect())
    };
    let width = instances.as_ref().map_or(1, Vec::len);

    let mut values: BTreeMap<u64, Vec<Option<f64>>> = BTreeMap::new();
    for s in series {
        let column = match &instances {
            Some(names) => {
                let tag = s.tags.as_ref().and_then(|tags| tags.get(INSTANCE_TAG));
                match tag.and_then(|tag| names.iter().position(|n| n == tag)) {
                    Some(column) => column,
                    None => continue,
                }
            }
            None => 0,
        };

        let time_idx = s.columns.iter().position(|c| c == "time").unwrap_or(0);
        let value_idx = if time_idx == 0 { 1 } else { 0 };
        for row in &s.values {
            let (Some(time), Some(value)) = (
                row.get(time_idx).and_then(parse_time),
                row.get(value_idx).and_then(|v| v.as_f64()),
            ) else {
                continue;
            };
            if time < start_ms {
                continue;
            }
            let index = ((time - start_ms) / step_ms) as u64;
            if index >= limit {
                continue;
            }
            values.entry(index).or_insert_with(|| vec![None; width])[column] = Some(value);
        }
    }

    MetricTable { instances, values }
}

/// Turns a response to [`series_query`] into messages. Every run of
/// consecutive buckets gets its own metadata message followed by pages of
/// sample rows, so a hole in the archive restarts the timeline instead of
/// carrying values across it. Within a run, a metric missing from a bucket
/// is sent as "unchanged".
fn messages_from_response(
    descriptor: &MetricDescriptor,
    response: &InfluxQLResponse,
    start_ms: i64,
    step_ms: i64,
    limit: u64,
    now_ms: i64,
) -> Vec<SourceMessage> {
    let tables: Vec<MetricTable> = (0..descriptor.metrics().len())
        .map(|i| {
            let series = response
                .results
                .iter()
                .enumerate()
                .find(|(pos, r)| r.statement_id.unwrap_or(*pos) == i)
                .and_then(|(_, r)| r.series.as_deref())
                .unwrap_or(&[]);
            metric_table(series, start_ms, step_ms, limit)
        })
        .collect();

    let present: BTreeSet<u64> = tables.iter().flat_map(|t| t.values.keys().copied()).collect();
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for index in present {
        match runs.last_mut() {
            Some((_, last)) if *last + 1 == index => *last = index,
            _ => runs.push((index, index)),
        }
    }

    let metrics: Vec<MetricMeta> = descriptor
        .metrics()
        .iter()
        .zip(&tables)
        .map(|(name, table)| MetricMeta {
            name: name.clone(),
            instances: table.instances.clone(),
        })
        .collect();

    let mut messages = Vec::new();
    for (first, last) in runs {
        messages.push(SourceMessage::Meta(SourceMeta {
            timestamp_ms: start_ms + first as i64 * step_ms,
            now_ms,
            metrics: metrics.clone(),
        }));

        let rows: Vec<SampleRow> = (first..=last).map(|index| bucket_row(&tables, index)).collect();
        messages.extend(rows.chunks(PAGE_ROWS).map(|page| SourceMessage::Samples(page.to_vec())));
    }
    messages
}

fn bucket_row(tables: &[MetricTable], index: u64) -> SampleRow {
    tables
        .iter()
        .map(|table| {
            let bucket = table.values.get(&index);
            match &table.instances {
                Some(names) => MetricValues::Instances(
                    bucket.cloned().unwrap_or_else(|| vec![None; names.len()]),
                ),
                None => MetricValues::Scalar(bucket.and_then(|b| b[0])),
            }
        })
        .collect()
}
