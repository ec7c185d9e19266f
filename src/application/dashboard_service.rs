// Dashboard service - One plot per resource, one series per host
use crate::application::plot_controller::{PlotConfig, PlotController, PlotEvent, SeriesSnapshot};
use crate::application::registry::SamplerRegistry;
use crate::domain::descriptor::MetricDescriptor;
use crate::domain::sample::{Sample, max_value};
use crate::domain::ticks::{AxisMax, ValueFormat, byte_rate_ticks, format_range, memory_ticks, time_ticks};
use crate::domain::window::{PlotFlags, Window, ZoomState};
use chrono::FixedOffset;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Host name that maps to the local machine.
pub const LOCALHOST: &str = "localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
    Network,
    Disk,
}

impl Resource {
    pub const ALL: [Resource; 4] = [
        Resource::Cpu,
        Resource::Memory,
        Resource::Network,
        Resource::Disk,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
            Resource::Network => "network",
            Resource::Disk => "disk",
        }
    }

    pub fn descriptor(&self) -> MetricDescriptor {
        match self {
            Resource::Cpu => MetricDescriptor::cpu(),
            Resource::Memory => MetricDescriptor::memory(),
            Resource::Network => MetricDescriptor::network(),
            Resource::Disk => MetricDescriptor::disk(),
        }
    }

    pub fn axis_max(&self) -> AxisMax {
        match self {
            Resource::Cpu => AxisMax::Unit(100.0),
            Resource::Memory => AxisMax::Unit(100_000_000.0),
            Resource::Network | Resource::Disk => AxisMax::AtLeast(100_000.0),
        }
    }

    pub fn value_format(&self) -> ValueFormat {
        match self {
            Resource::Cpu => ValueFormat::Percent,
            Resource::Memory => ValueFormat::Bytes,
            Resource::Network => ValueFormat::BitsPerSec,
            Resource::Disk => ValueFormat::BytesPerSec,
        }
    }

    fn value_ticks(&self, y_max: f64) -> Vec<f64> {
        match self {
            Resource::Cpu => (0..=4).map(|i| y_max * i as f64 / 4.0).collect(),
            Resource::Memory => memory_ticks(y_max),
            Resource::Network | Resource::Disk => byte_rate_ticks(y_max).ticks,
        }
    }
}

impl FromStr for Resource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.name() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown resource: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeTick {
    pub time_ms: i64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueTick {
    pub value: f64,
    pub label: String,
}

/// Window state shared by all plots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowView {
    pub window: Window,
    pub range_label: String,
    pub flags: PlotFlags,
}

/// Everything a client needs to draw one plot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotSnapshot {
    pub resource: Resource,
    pub window: Window,
    pub flags: PlotFlags,
    pub walking: bool,
    pub start_ms: i64,
    pub end_ms: i64,
    pub step_ms: i64,
    pub series: Vec<SeriesSnapshot>,
    pub time_ticks: Vec<TimeTick>,
    pub value_ticks: Vec<ValueTick>,
    pub y_max: f64,
}

pub struct DashboardService {
    plots: Vec<(Resource, PlotController)>,
    zoom: Mutex<ZoomState>,
    registry: Arc<SamplerRegistry>,
    offset: FixedOffset,
}

impl DashboardService {
    /// Builds one walking plot per resource with a series for each host.
    pub fn new(
        registry: Arc<SamplerRegistry>,
        hosts: &[String],
        plot_config: PlotConfig,
        offset: FixedOffset,
    ) -> Self {
        let zoom = ZoomState::new(
            Window::walking(plot_config.default_range_s),
            plot_config.min_range_s,
            plot_config.snap_to_now_s,
        );

        let plots = Resource::ALL
            .into_iter()
            .map(|resource| {
                let plot = PlotController::new(plot_config.clone(), registry.clock());
                for host in hosts {
                    let descriptor = resource.descriptor();
                    let descriptor = if host == LOCALHOST {
                        descriptor
                    } else {
                        descriptor.on_host(host.as_str())
                    };
                    plot.add_series(host.clone(), registry.get_or_create(&descriptor));
                }
                (resource, plot)
            })
            .collect();

        tracing::info!("Dashboard started for hosts {:?}", hosts);
        Self {
            plots,
            zoom: Mutex::new(zoom),
            registry,
            offset,
        }
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.plots.iter().map(|(resource, _)| *resource).collect()
    }

    fn plot(&self, resource: Resource) -> Option<&PlotController> {
        self.plots
            .iter()
            .find(|(r, _)| *r == resource)
            .map(|(_, plot)| plot)
    }

    pub fn subscribe(&self, resource: Resource) -> Option<broadcast::Receiver<PlotEvent>> {
        self.plot(resource).map(PlotController::subscribe)
    }

    pub fn window(&self) -> WindowView {
        let window = self.zoom.lock().window();
        self.view(window)
    }

    fn view(&self, window: Window) -> WindowView {
        let archives = self.plots.iter().any(|(_, plot)| plot.flags().zoom_in);
        WindowView {
            window,
            range_label: format_range(window.range_s),
            flags: PlotFlags::compute(&window, archives),
        }
    }

    pub fn set_range(&self, range_s: f64) -> WindowView {
        self.transition(|zoom, now_s| Some(zoom.set_range(range_s, now_s)))
    }

    pub fn zoom_in(&self, range_s: f64, stop_s: Option<f64>) -> WindowView {
        self.transition(|zoom, now_s| Some(zoom.zoom_in(range_s, stop_s, now_s)))
    }

    pub fn zoom_out(&self) -> WindowView {
        self.transition(|zoom, now_s| Some(zoom.zoom_out(now_s)))
    }

    pub fn scroll_left(&self) -> WindowView {
        self.transition(|zoom, now_s| Some(zoom.scroll_left(now_s)))
    }

    pub fn scroll_right(&self) -> WindowView {
        self.transition(|zoom, now_s| zoom.scroll_right(now_s))
    }

    pub fn goto_now(&self) -> WindowView {
        self.transition(|zoom, now_s| Some(zoom.goto_now(now_s)))
    }

    /// Computes the next window once and moves every plot to it. A
    /// transition that does not apply leaves the plots alone.
    fn transition<F>(&self, step: F) -> WindowView
    where
        F: FnOnce(&mut ZoomState, f64) -> Option<Window>,
    {
        let now_s = self.registry.clock().now_s();
        let mut zoom = self.zoom.lock();
        let Some(window) = step(&mut zoom, now_s) else {
            let window = zoom.window();
            drop(zoom);
            return self.view(window);
        };
        drop(zoom);

        tracing::debug!("Moving plots to {:?}", window);
        for (_, plot) in &self.plots {
            plot.reset(window.range_s, window.stop_s);
        }
        self.view(window)
    }

    pub fn snapshot(&self, resource: Resource) -> Option<PlotSnapshot> {
        let plot = self.plot(resource)?;
        let series = plot.series();
        let (start_ms, end_ms) = plot.plot_range();
        let now_ms = self.registry.clock().now_ms();

        let data: Vec<Vec<Sample>> = series.iter().map(|s| s.data.clone()).collect();
        let time_ticks = time_ticks(&data, now_ms, self.offset)
            .map(|ticks| {
                ticks
                    .ticks
                    .iter()
                    .map(|t| TimeTick {
                        time_ms: *t,
                        label: ticks.format(*t),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let y_max = resource.axis_max().resolve(max_value(data.iter().flatten()));
        let format = resource.value_format();
        let value_ticks = resource
            .value_ticks(y_max)
            .into_iter()
            .map(|value| ValueTick {
                value,
                label: format.format(value),
            })
            .collect();

        Some(PlotSnapshot {
            resource,
            window: plot.window(),
            flags: plot.flags(),
            walking: plot.is_walking(),
            start_ms,
            end_ms,
            step_ms: plot.step_ms(),
            series,
            time_ticks,
            value_ticks,
            y_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::sampler::SamplerConfig;
    use crate::testing::{ManualClock, ScriptedArchive, SilentLive, settle};

    const T0: i64 = 1_700_000_000_000;
    const T0_S: f64 = 1_700_000_000.0;

    fn registry(clock: Arc<ManualClock>, archive: Arc<ScriptedArchive>) -> Arc<SamplerRegistry> {
        Arc::new(SamplerRegistry::new(
            Arc::new(SilentLive::default()),
            archive,
            clock,
            SamplerConfig {
                capacity: 100,
                interval_ms: 1000,
            },
        ))
    }

    fn dashboard(hosts: &[&str]) -> (DashboardService, Arc<SamplerRegistry>) {
        let registry = registry(Arc::new(ManualClock::new(T0)), Arc::new(ScriptedArchive::empty()));
        let hosts: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
        let service = DashboardService::new(
            registry.clone(),
            &hosts,
            PlotConfig::default(),
            FixedOffset::east_opt(0).unwrap(),
        );
        (service, registry)
    }

    #[test]
    fn test_resource_names() {
        assert_eq!("memory".parse::<Resource>().unwrap(), Resource::Memory);
        assert!("gpu".parse::<Resource>().is_err());
        for resource in Resource::ALL {
            assert_eq!(resource.name().parse::<Resource>().unwrap(), resource);
        }
    }

    #[tokio::test]
    async fn test_one_series_per_host() {
        let (service, registry) = dashboard(&["localhost", "web-1"]);

        assert_eq!(service.resources(), Resource::ALL.to_vec());
        assert_eq!(registry.len(), 8);

        let snapshot = service.snapshot(Resource::Cpu).unwrap();
        let names: Vec<&str> = snapshot.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["localhost", "web-1"]);
        assert!(snapshot.walking);
        assert_eq!((snapshot.start_ms, snapshot.end_ms), (T0 - 300_000, T0));
    }

    #[tokio::test]
    async fn test_transitions_move_every_plot() {
        let (service, _registry) = dashboard(&["localhost"]);

        let view = service.scroll_left();
        assert_eq!(view.window, Window::pinned(300.0, T0_S - 30.0));
        assert_eq!(view.range_label, "5 minutes");
        assert!(view.flags.scroll_right);
        for resource in Resource::ALL {
            let snapshot = service.snapshot(resource).unwrap();
            assert_eq!(snapshot.window, view.window);
            assert!(!snapshot.walking);
        }

        let view = service.zoom_out();
        assert_eq!(view.window.range_s, 3_600.0);
        assert_eq!(service.snapshot(Resource::Disk).unwrap().step_ms, 4000);

        let view = service.goto_now();
        assert!(view.window.is_walking());
        assert_eq!(service.window(), view);

        // Nothing to scroll right to while walking.
        assert_eq!(service.scroll_right(), view);
    }

    #[tokio::test]
    async fn test_scroll_right_while_walking_keeps_plots() {
        let archive = Arc::new(ScriptedArchive::with_values(0, &[1.0, 2.0]));
        let service = DashboardService::new(
            registry(Arc::new(ManualClock::new(T0)), archive.clone()),
            &[LOCALHOST.to_string()],
            PlotConfig::default(),
            FixedOffset::east_opt(0).unwrap(),
        );
        settle(|| false).await;
        let queries = archive.query_count();
        assert!(queries > 0);

        let mut events = service.subscribe(Resource::Cpu).unwrap();
        let view = service.scroll_right();
        assert!(view.window.is_walking());
        assert_eq!(view.window, service.snapshot(Resource::Cpu).unwrap().window);

        // No refill: no new archive queries and no events.
        settle(|| false).await;
        assert_eq!(archive.query_count(), queries);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_memory_axis() {
        let clock = Arc::new(ManualClock::new(T0));
        let registry = registry(clock, Arc::new(ScriptedArchive::empty()));
        let sampler = registry.get_or_create(&MetricDescriptor::memory());
        sampler.push(T0 - 1000, 150_000_000.0);
        sampler.push(T0, 150_000_000.0);

        let service = DashboardService::new(
            registry.clone(),
            &[LOCALHOST.to_string()],
            PlotConfig::default(),
            FixedOffset::east_opt(0).unwrap(),
        );

        let snapshot = service.snapshot(Resource::Memory).unwrap();
        assert_eq!(snapshot.y_max, 200_000_000.0);
        assert!(snapshot.value_ticks.len() <= 5);
        assert_eq!(snapshot.value_ticks[0].label, "0 B");
        assert!(snapshot.value_ticks.iter().all(|t| t.value < snapshot.y_max));
    }

    #[tokio::test]
    async fn test_cpu_axis_without_data() {
        let (service, _registry) = dashboard(&["localhost"]);
        let snapshot = service.snapshot(Resource::Cpu).unwrap();

        assert_eq!(snapshot.y_max, 100.0);
        let labels: Vec<&str> = snapshot.value_ticks.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["0%", "25%", "50%", "75%", "100%"]);
        assert!(snapshot.time_ticks.is_empty());

        let network = service.snapshot(Resource::Network).unwrap();
        assert_eq!(network.y_max, 100_000.0);
        assert_eq!(network.value_ticks[0].label, "0 bps");
    }
}
