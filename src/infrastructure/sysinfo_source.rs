// Live source backed by the local host via sysinfo
use crate::application::metrics_source::{
    LiveSource, MetricMeta, MetricValues, SourceMessage, SourceMeta,
};
use crate::domain::descriptor::{Derive, MetricDescriptor};
use crate::infrastructure::LOCAL_HOSTS;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use sysinfo::{Networks, ProcessesToUpdate, System};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 16;

/// Samples the machine this service runs on. Subscriptions for other hosts
/// are refused; their data can only come from the archive.
#[derive(Debug, Clone, Default)]
pub struct SysinfoLiveSource;

#[async_trait]
impl LiveSource for SysinfoLiveSource {
    async fn subscribe(
        &self,
        descriptor: &MetricDescriptor,
        interval_ms: i64,
    ) -> anyhow::Result<mpsc::Receiver<SourceMessage>> {
        if let Some(host) = descriptor.host() {
            if !LOCAL_HOSTS.contains(&host) {
                anyhow::bail!("no live source for remote host {}", host);
            }
        }
        if interval_ms <= 0 {
            anyhow::bail!("invalid sampling interval {}ms", interval_ms);
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let descriptor = descriptor.clone();
        tokio::spawn(async move {
            let mut host = HostReader::new();
            let mut rates = RateTracker::default();
            let mut instances: Option<Vec<Option<Vec<String>>>> = None;
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms as u64));

            loop {
                ticker.tick().await;
                let now_ms = Utc::now().timestamp_millis();
                host.refresh();
                let readings: Vec<Reading> = descriptor
                    .metrics()
                    .iter()
                    .map(|name| host.read(name))
                    .collect();

                let current: Vec<Option<Vec<String>>> =
                    readings.iter().map(|r| r.instances.clone()).collect();
                if instances.as_ref() != Some(&current) {
                    let meta = SourceMeta {
                        timestamp_ms: now_ms,
                        now_ms,
                        metrics: descriptor
                            .metrics()
                            .iter()
                            .zip(&current)
                            .map(|(name, instances)| MetricMeta {
                                name: name.clone(),
                                instances: instances.clone(),
                            })
                            .collect(),
                    };
                    if tx.send(SourceMessage::Meta(meta)).await.is_err() {
                        break;
                    }
                    instances = Some(current);
                }

                let row = descriptor
                    .metrics()
                    .iter()
                    .zip(readings)
                    .map(|(name, reading)| reading.into_values(name, descriptor.derive(), &mut rates, now_ms))
                    .collect();
                if tx.send(SourceMessage::Samples(vec![row])).await.is_err() {
                    break;
                }
            }
            tracing::debug!("Live subscription for {:?} closed", descriptor.metrics());
        });

        Ok(rx)
    }
}

/// One metric's current value. Counters are cumulative and become rates
/// when the descriptor asks for them.
#[derive(Debug, Clone, PartialEq)]
struct Reading {
    instances: Option<Vec<String>>,
    values: Vec<f64>,
    counter: bool,
}

impl Reading {
    fn gauge(value: f64) -> Self {
        Self {
            instances: None,
            values: vec![value],
            counter: false,
        }
    }

    fn counter(value: f64) -> Self {
        Self {
            instances: None,
            values: vec![value],
            counter: true,
        }
    }

    fn unknown() -> Self {
        Self {
            instances: None,
            values: Vec::new(),
            counter: false,
        }
    }

    fn into_values(self, name: &str, derive: Derive, rates: &mut RateTracker, now_ms: i64) -> MetricValues {
        let derived: Vec<Option<f64>> = match (derive, self.counter) {
            (Derive::Rate, true) => {
                let keys = self.instances.clone().unwrap_or_else(|| vec![String::new()]);
                keys.iter()
                    .zip(&self.values)
                    .map(|(instance, value)| rates.rate(&format!("{}/{}", name, instance), *value, now_ms))
                    .collect()
            }
            _ => self.values.iter().copied().map(Some).collect(),
        };

        match self.instances {
            Some(_) => MetricValues::Instances(derived),
            None => MetricValues::Scalar(derived.first().copied().flatten()),
        }
    }
}

/// Per-second rates of cumulative counters.
#[derive(Debug, Default)]
pub struct RateTracker {
    previous: HashMap<String, (f64, i64)>,
}

impl RateTracker {
    /// `None` for the first reading of a key, after a counter reset, or when
    /// no time has passed.
    pub fn rate(&mut self, key: &str, value: f64, now_ms: i64) -> Option<f64> {
        let previous = self.previous.insert(key.to_string(), (value, now_ms));
        let (last, last_ms) = previous?;
        if now_ms <= last_ms || value < last {
            return None;
        }
        Some((value - last) * 1000.0 / (now_ms - last_ms) as f64)
    }
}

struct HostReader {
    system: System,
    networks: Networks,
    disk_bytes: f64,
}

impl HostReader {
    fn new() -> Self {
        Self {
            system: System::new(),
            networks: Networks::new_with_refreshed_list(),
            disk_bytes: 0.0,
        }
    }

    fn refresh(&mut self) {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.networks.refresh();

        // Process disk usage is reported per refresh; keep a running total.
        self.disk_bytes += self
            .system
            .processes()
            .values()
            .map(|p| {
                let usage = p.disk_usage();
                (usage.read_bytes + usage.written_bytes) as f64
            })
            .sum::<f64>();
    }

    fn read(&self, metric: &str) -> Reading {
        match metric {
            // Busy time in millisec per second, per CPU on average.
            "kernel.all.cpu.user" => Reading::gauge(self.system.global_cpu_usage() as f64 * 10.0),
            "kernel.all.cpu.nice" | "kernel.all.cpu.sys" => Reading::gauge(0.0),
            "mem.util.used" => Reading::gauge(self.system.used_memory() as f64),
            "network.interface.total.bytes" => {
                let mut interfaces: Vec<(&String, f64)> = self
                    .networks
                    .iter()
                    .map(|(name, data)| {
                        (name, (data.total_received() + data.total_transmitted()) as f64)
                    })
                    .collect();
                interfaces.sort_by(|a, b| a.0.cmp(b.0));
                Reading {
                    instances: Some(interfaces.iter().map(|(name, _)| name.to_string()).collect()),
                    values: interfaces.iter().map(|(_, bytes)| *bytes).collect(),
                    counter: true,
                }
            }
            "disk.dev.total_bytes" => Reading::counter(self.disk_bytes),
            other => {
                tracing::debug!("No local reading for metric {}", other);
                Reading::unknown()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_tracker() {
        let mut rates = RateTracker::default();

        assert_eq!(rates.rate("eth0", 1000.0, 0), None);
        assert_eq!(rates.rate("eth0", 3000.0, 2000), Some(1000.0));
        assert_eq!(rates.rate("eth1", 5.0, 2000), None);
        // Counter wrapped or reset.
        assert_eq!(rates.rate("eth0", 10.0, 3000), None);
        assert_eq!(rates.rate("eth0", 510.0, 3500), Some(1000.0));
    }

    #[test]
    fn test_counter_readings_become_rates() {
        let mut rates = RateTracker::default();
        let reading = || Reading {
            instances: Some(vec!["eth0".to_string(), "lo".to_string()]),
            values: vec![100.0, 50.0],
            counter: true,
        };

        assert_eq!(
            reading().into_values("net", Derive::Rate, &mut rates, 0),
            MetricValues::Instances(vec![None, None])
        );

        let later = Reading {
            values: vec![300.0, 50.0],
            ..reading()
        };
        assert_eq!(
            later.into_values("net", Derive::Rate, &mut rates, 1000),
            MetricValues::Instances(vec![Some(200.0), Some(0.0)])
        );

        assert_eq!(
            Reading::gauge(42.0).into_values("mem", Derive::Raw, &mut rates, 0),
            MetricValues::Scalar(Some(42.0))
        );
        assert_eq!(
            Reading::unknown().into_values("x", Derive::Raw, &mut rates, 0),
            MetricValues::Scalar(None)
        );
    }

    #[tokio::test]
    async fn test_refuses_remote_hosts() {
        let result = SysinfoLiveSource
            .subscribe(&MetricDescriptor::memory().on_host("web-1"), 1000)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_local_memory_feed() {
        let mut rx = SysinfoLiveSource
            .subscribe(&MetricDescriptor::memory(), 20)
            .await
            .unwrap();

        let Some(SourceMessage::Meta(meta)) = rx.recv().await else {
            panic!("expected metadata first");
        };
        assert_eq!(meta.metrics[0].name, "mem.util.used");
        assert_eq!(meta.metrics[0].instances, None);

        let Some(SourceMessage::Samples(rows)) = rx.recv().await else {
            panic!("expected a sample row");
        };
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0][0], MetricValues::Scalar(Some(v)) if v > 0.0));
    }
}
