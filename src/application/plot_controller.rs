// Plot controller - Named series over a walking or pinned window
use crate::application::clock::Clock;
use crate::application::fill::FillHandle;
use crate::application::sampler::MetricsSampler;
use crate::domain::sample::{Sample, SeriesBuffer};
use crate::domain::window::{
    MAX_WALK_INTERVAL_MS, PlotFlags, Window, ZoomState, step_for_range,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::Instant;

pub type SeriesId = u64;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct PlotConfig {
    pub min_range_s: f64,
    pub snap_to_now_s: f64,
    pub points_per_window: f64,
    pub default_range_s: f64,
    /// Fixed sample spacing; derived from the range when unset.
    pub step_ms: Option<i64>,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            min_range_s: 300.0,
            snap_to_now_s: 10.0,
            points_per_window: 1000.0,
            default_range_s: 300.0,
            step_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotEvent {
    /// Window or flags changed.
    Changed,
    /// Series data changed.
    Refresh,
    Hover { series: SeriesId, hovered: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub id: SeriesId,
    pub name: String,
    pub hovered: bool,
    pub data: Vec<Sample>,
}

struct SeriesEntry {
    id: SeriesId,
    name: String,
    sampler: Arc<MetricsSampler>,
    buffer: SeriesBuffer,
    fill: Option<FillHandle>,
    archives: bool,
}

struct PlotState {
    zoom: ZoomState,
    now_ms: i64,
    step_ms: i64,
    flags: PlotFlags,
    /// Draw order; the last entry is drawn on top.
    series: Vec<SeriesEntry>,
    next_id: SeriesId,
    hovered: Option<SeriesId>,
    generation: u64,
    walker: Option<AbortHandle>,
}

impl PlotState {
    fn plot_range(&self) -> (i64, i64) {
        let window = self.zoom.window();
        let end = match window.stop_s {
            Some(stop_s) => (stop_s * 1000.0) as i64,
            None => self.now_ms,
        };
        (end - (window.range_s * 1000.0) as i64, end)
    }

    fn compute_flags(&self) -> PlotFlags {
        let archives = self.series.iter().any(|entry| entry.archives);
        PlotFlags::compute(&self.zoom.window(), archives)
    }

    fn stop_walking(&mut self) {
        self.generation += 1;
        if let Some(walker) = self.walker.take() {
            walker.abort();
        }
    }
}

struct PlotInner {
    state: Mutex<PlotState>,
    config: PlotConfig,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<PlotEvent>,
}

impl PlotInner {
    fn emit(&self, event: PlotEvent) {
        let _ = self.events.send(event);
    }

    /// Refills every series for the current window and restarts walking.
    fn apply(self: &Arc<Self>, state: &mut PlotState) {
        state.stop_walking();

        let window = state.zoom.window();
        state.now_ms = self.clock.now_ms();
        state.step_ms = self
            .config
            .step_ms
            .unwrap_or_else(|| step_for_range(window.range_s, self.config.points_per_window));

        let (start_ms, end_ms) = state.plot_range();
        let step_ms = state.step_ms;
        for entry in &mut state.series {
            self.start_fill(entry, start_ms, end_ms, step_ms);
        }

        state.flags = state.compute_flags();
        if window.is_walking() {
            self.start_walking(state);
        }
    }

    fn start_fill(&self, entry: &mut SeriesEntry, start_ms: i64, end_ms: i64, step_ms: i64) {
        if let Some(fill) = entry.fill.take() {
            fill.cancel();
        }
        entry.buffer = SeriesBuffer::new();

        let fill = entry.sampler.fill(&entry.buffer, start_ms, end_ms, step_ms);
        let mut progress = fill.progress();
        let events = self.events.clone();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let _ = events.send(PlotEvent::Refresh);
            }
        });
        entry.fill = Some(fill);
    }

    fn start_walking(self: &Arc<Self>, state: &mut PlotState) {
        if state.walker.as_ref().is_some_and(|walker| !walker.is_finished()) {
            return;
        }
        if state.step_ms <= 0 || state.step_ms > MAX_WALK_INTERVAL_MS {
            tracing::debug!("Walk interval {}ms out of range, not walking", state.step_ms);
            return;
        }

        let generation = state.generation;
        let period = Duration::from_millis(state.step_ms as u64);
        let first = Instant::now() + period;
        let plot = Arc::downgrade(self);

        let walker = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first, period);
            loop {
                ticker.tick().await;
                let Some(plot) = plot.upgrade() else {
                    return;
                };
                if !plot.walk(generation) {
                    return;
                }
            }
        });
        state.walker = Some(walker.abort_handle());
    }

    /// One walking step. Returns false when the window was reset since the
    /// walker started.
    fn walk(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }

        let step_ms = state.step_ms;
        state.now_ms += step_ms;
        let now_ms = state.now_ms;
        let (start_ms, _) = state.plot_range();

        for entry in &state.series {
            if !entry.fill.as_ref().is_some_and(FillHandle::is_running) {
                entry.buffer.trim_before(start_ms);
            }

            let value = entry.sampler.sample_real_time(now_ms - step_ms, now_ms);
            let mut data = entry.buffer.lock();
            match value {
                Some(v) if v.is_nan() => {}
                Some(v) => data.push(Sample::new(now_ms, v)),
                None => {
                    if data.last().is_some_and(|last| !last.is_gap()) {
                        data.push(Sample::gap(now_ms));
                    }
                }
            }
        }
        drop(state);

        self.emit(PlotEvent::Refresh);
        true
    }

    fn set_archives(&self, id: SeriesId, archives: bool) {
        let mut state = self.state.lock();
        if let Some(entry) = state.series.iter_mut().find(|entry| entry.id == id) {
            entry.archives = archives;
        }

        let flags = state.compute_flags();
        let changed = flags != state.flags;
        state.flags = flags;
        drop(state);

        if changed {
            self.emit(PlotEvent::Changed);
        }
    }

    fn data(&self, id: SeriesId) -> Option<Vec<Sample>> {
        let state = self.state.lock();
        state
            .series
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.buffer.snapshot())
    }

    fn remove(&self, id: SeriesId) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.series.iter().position(|entry| entry.id == id) else {
            return false;
        };

        let entry = state.series.remove(pos);
        if let Some(fill) = entry.fill {
            fill.cancel();
        }
        if state.hovered == Some(id) {
            state.hovered = None;
        }
        state.flags = state.compute_flags();
        drop(state);

        self.emit(PlotEvent::Refresh);
        true
    }

    fn move_to_front(&self, id: SeriesId) {
        let mut state = self.state.lock();
        if let Some(pos) = state.series.iter().position(|entry| entry.id == id) {
            let entry = state.series.remove(pos);
            state.series.push(entry);
            drop(state);
            self.emit(PlotEvent::Refresh);
        }
    }

    fn hover(&self, series: Option<SeriesId>) {
        let mut state = self.state.lock();
        if state.hovered == series {
            return;
        }
        let previous = std::mem::replace(&mut state.hovered, series);
        drop(state);

        if let Some(previous) = previous {
            self.emit(PlotEvent::Hover {
                series: previous,
                hovered: false,
            });
        }
        if let Some(series) = series {
            self.emit(PlotEvent::Hover {
                series,
                hovered: true,
            });
        }
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.stop_walking();
        for entry in state.series.drain(..) {
            if let Some(fill) = entry.fill {
                fill.cancel();
            }
        }
        state.hovered = None;
    }
}

/// Owns the series of one plot and moves its window around.
///
/// In the walking state a timer advances the window by one step per step
/// interval and appends the newest live sample to every series. Every
/// transition refills all series for the new window.
pub struct PlotController {
    inner: Arc<PlotInner>,
}

impl PlotController {
    /// Starts a walking plot over `config.default_range_s`. Must be called
    /// from within a tokio runtime.
    pub fn new(config: PlotConfig, clock: Arc<dyn Clock>) -> Self {
        let zoom = ZoomState::new(
            Window::walking(config.default_range_s),
            config.min_range_s,
            config.snap_to_now_s,
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(PlotInner {
            state: Mutex::new(PlotState {
                zoom,
                now_ms: 0,
                step_ms: 0,
                flags: PlotFlags::compute(&Window::walking(config.default_range_s), false),
                series: Vec::new(),
                next_id: 0,
                hovered: None,
                generation: 0,
                walker: None,
            }),
            config,
            clock,
            events,
        });

        {
            let mut state = inner.state.lock();
            let window = state.zoom.window();
            let now_s = inner.clock.now_s();
            state.zoom.reset(window.range_s, window.stop_s, now_s);
            inner.apply(&mut state);
        }

        Self { inner }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlotEvent> {
        self.inner.events.subscribe()
    }

    pub fn window(&self) -> Window {
        self.inner.state.lock().zoom.window()
    }

    pub fn flags(&self) -> PlotFlags {
        self.inner.state.lock().flags
    }

    pub fn step_ms(&self) -> i64 {
        self.inner.state.lock().step_ms
    }

    /// The plotted time span in milliseconds.
    pub fn plot_range(&self) -> (i64, i64) {
        self.inner.state.lock().plot_range()
    }

    /// True while the window ends at now, even when the step is too long
    /// for a timer.
    pub fn is_walking(&self) -> bool {
        self.inner.state.lock().zoom.window().is_walking()
    }

    pub fn is_timer_active(&self) -> bool {
        self.inner
            .state
            .lock()
            .walker
            .as_ref()
            .is_some_and(|walker| !walker.is_finished())
    }

    pub fn start_walking(&self) {
        let mut state = self.inner.state.lock();
        if state.zoom.window().is_walking() {
            self.inner.start_walking(&mut state);
        }
    }

    pub fn stop_walking(&self) {
        self.inner.state.lock().stop_walking();
    }

    pub fn add_series(&self, name: impl Into<String>, sampler: Arc<MetricsSampler>) -> SeriesHandle {
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        let (start_ms, end_ms) = state.plot_range();
        let step_ms = state.step_ms;
        let mut entry = SeriesEntry {
            id,
            name: name.into(),
            sampler: sampler.clone(),
            buffer: SeriesBuffer::new(),
            fill: None,
            archives: false,
        };
        self.inner.start_fill(&mut entry, start_ms, end_ms, step_ms);
        state.series.push(entry);
        drop(state);

        let plot = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let archives = sampler.has_archives().await;
            if let Some(plot) = plot.upgrade() {
                plot.set_archives(id, archives);
            }
        });

        self.inner.emit(PlotEvent::Refresh);
        SeriesHandle {
            plot: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// All series in draw order.
    pub fn series(&self) -> Vec<SeriesSnapshot> {
        let state = self.inner.state.lock();
        state
            .series
            .iter()
            .map(|entry| SeriesSnapshot {
                id: entry.id,
                name: entry.name.clone(),
                hovered: state.hovered == Some(entry.id),
                data: entry.buffer.snapshot(),
            })
            .collect()
    }

    /// Un-hovers the current series, if any, and hovers `series`.
    pub fn hover(&self, series: Option<SeriesId>) {
        self.inner.hover(series);
    }

    pub fn reset(&self, range_s: f64, stop_s: Option<f64>) {
        self.transition(|zoom, now_s| Some(zoom.reset(range_s, stop_s, now_s)));
    }

    pub fn set_range(&self, range_s: f64) {
        self.transition(|zoom, now_s| Some(zoom.set_range(range_s, now_s)));
    }

    pub fn zoom_in(&self, range_s: f64, stop_s: Option<f64>) {
        self.transition(|zoom, now_s| Some(zoom.zoom_in(range_s, stop_s, now_s)));
    }

    pub fn zoom_out(&self) {
        self.transition(|zoom, now_s| Some(zoom.zoom_out(now_s)));
    }

    pub fn scroll_left(&self) {
        self.transition(|zoom, now_s| Some(zoom.scroll_left(now_s)));
    }

    pub fn scroll_right(&self) {
        self.transition(|zoom, now_s| zoom.scroll_right(now_s));
    }

    pub fn goto_now(&self) {
        self.transition(|zoom, now_s| Some(zoom.goto_now(now_s)));
    }

    fn transition<F>(&self, step: F)
    where
        F: FnOnce(&mut ZoomState, f64) -> Option<Window>,
    {
        let now_s = self.inner.clock.now_s();
        let mut state = self.inner.state.lock();
        if step(&mut state.zoom, now_s).is_none() {
            return;
        }
        self.inner.apply(&mut state);
        drop(state);

        self.inner.emit(PlotEvent::Refresh);
        self.inner.emit(PlotEvent::Changed);
    }

    /// Stops walking, cancels all fills and lets go of every sampler.
    pub fn destroy(self) {
        self.inner.shutdown();
    }
}

impl Drop for PlotController {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

/// A series' view of its plot. Does nothing once the plot is gone.
#[derive(Clone)]
pub struct SeriesHandle {
    plot: Weak<PlotInner>,
    id: SeriesId,
}

impl SeriesHandle {
    pub fn id(&self) -> SeriesId {
        self.id
    }

    /// Current samples of the series.
    pub fn data(&self) -> Vec<Sample> {
        self.plot
            .upgrade()
            .and_then(|plot| plot.data(self.id))
            .unwrap_or_default()
    }

    pub fn remove(&self) -> bool {
        self.plot.upgrade().is_some_and(|plot| plot.remove(self.id))
    }

    pub fn move_to_front(&self) {
        if let Some(plot) = self.plot.upgrade() {
            plot.move_to_front(self.id);
        }
    }

    pub fn hover(&self, hovered: bool) {
        let Some(plot) = self.plot.upgrade() else {
            return;
        };
        if hovered {
            plot.hover(Some(self.id));
        } else if plot.state.lock().hovered == Some(self.id) {
            plot.hover(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::sampler::SamplerConfig;
    use crate::domain::descriptor::MetricDescriptor;
    use crate::testing::{ManualClock, ScriptStep, ScriptedArchive, SilentLive, settle};

    const T0: i64 = 1_700_000_000_000;
    const T0_S: f64 = 1_700_000_000.0;

    struct Fixture {
        clock: Arc<ManualClock>,
        live: Arc<SilentLive>,
        sampler: Arc<MetricsSampler>,
    }

    fn fixture(archive: ScriptedArchive) -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let live = Arc::new(SilentLive::default());
        let sampler = MetricsSampler::spawn(
            MetricDescriptor::memory(),
            live.clone(),
            Arc::new(archive),
            clock.clone(),
            SamplerConfig {
                capacity: 100,
                interval_ms: 1000,
            },
        );
        Fixture {
            clock,
            live,
            sampler,
        }
    }

    fn new_plot(f: &Fixture, config: PlotConfig) -> PlotController {
        PlotController::new(config, f.clock.clone())
    }

    fn values(samples: &[Sample]) -> Vec<(i64, Option<f64>)> {
        samples.iter().map(|s| (s.time_ms, s.value)).collect()
    }

    fn drain(rx: &mut broadcast::Receiver<PlotEvent>) -> Vec<PlotEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_starts_walking_over_default_range() {
        let f = fixture(ScriptedArchive::empty());
        let plot = new_plot(&f, PlotConfig::default());

        assert!(plot.is_walking());
        assert!(plot.is_timer_active());
        assert_eq!(plot.window(), Window::walking(300.0));
        assert_eq!(plot.step_ms(), 1000);
        assert_eq!(plot.plot_range(), (T0 - 300_000, T0));
    }

    #[tokio::test]
    async fn test_reset_floors_and_recenters() {
        let f = fixture(ScriptedArchive::empty());
        let plot = new_plot(&f, PlotConfig::default());

        plot.reset(60.0, Some(T0_S - 5_000.0));
        assert_eq!(plot.window(), Window::pinned(300.0, T0_S - 4_880.0));
        assert!(!plot.is_walking());
        assert!(!plot.is_timer_active());
        assert_eq!(plot.plot_range(), (T0 - 5_180_000, T0 - 4_880_000));
        assert!(plot.flags().scroll_right);
    }

    #[tokio::test]
    async fn test_reset_near_now_keeps_walking() {
        let f = fixture(ScriptedArchive::empty());
        let plot = new_plot(&f, PlotConfig::default());

        plot.reset(600.0, Some(T0_S - 5.0));
        assert_eq!(plot.window(), Window::walking(600.0));
        assert!(plot.is_timer_active());
        assert!(!plot.flags().scroll_right);
    }

    #[tokio::test]
    async fn test_transitions_emit_events() {
        let f = fixture(ScriptedArchive::empty());
        let plot = new_plot(&f, PlotConfig::default());
        let mut events = plot.subscribe();

        plot.scroll_left();
        assert_eq!(plot.window(), Window::pinned(300.0, T0_S - 30.0));
        assert_eq!(drain(&mut events), vec![PlotEvent::Refresh, PlotEvent::Changed]);

        plot.goto_now();
        assert!(plot.is_timer_active());

        // Scrolling right while walking does nothing.
        drain(&mut events);
        plot.scroll_right();
        assert!(drain(&mut events).is_empty());
        assert!(plot.is_walking());
    }

    #[tokio::test]
    async fn test_zoom_history_on_controller() {
        let f = fixture(ScriptedArchive::empty());
        let plot = new_plot(&f, PlotConfig::default());

        plot.zoom_in(600.0, Some(T0_S - 7_200.0));
        assert_eq!(plot.window(), Window::pinned(600.0, T0_S - 7_200.0));
        plot.zoom_out();
        assert_eq!(plot.window(), Window::pinned(300.0, T0_S - 7_350.0));
        plot.zoom_out();
        assert_eq!(plot.window(), Window::pinned(3_600.0, T0_S - 5_700.0));
        assert_eq!(plot.step_ms(), 4000);

        plot.set_range(86_400.0);
        assert_eq!(plot.window(), Window::pinned(86_400.0, T0_S - 5_700.0));
        assert_eq!(plot.step_ms(), 87_000);
    }

    #[tokio::test]
    async fn test_overflow_guard_never_schedules_timer() {
        let f = fixture(ScriptedArchive::empty());
        let config = PlotConfig {
            step_ms: Some(2_100_000_000),
            ..PlotConfig::default()
        };
        let plot = new_plot(&f, config);

        assert!(plot.is_walking());
        assert!(!plot.is_timer_active());
        plot.start_walking();
        assert!(!plot.is_timer_active());
    }

    #[tokio::test]
    async fn test_add_series_fills_live_region() {
        let f = fixture(ScriptedArchive::empty());
        f.sampler.push(T0 - 2000, 1.0);
        f.sampler.push(T0 - 1000, 2.0);
        f.sampler.push(T0, 3.0);

        let plot = new_plot(&f, PlotConfig::default());
        let series = plot.add_series("memory", f.sampler.clone());

        assert_eq!(
            values(&series.data()),
            vec![(T0 - 2000, Some(1.0)), (T0 - 1000, Some(1.5)), (T0, Some(2.5))]
        );

        // A reset over the same window refills a fresh buffer.
        plot.reset(300.0, None);
        assert_eq!(series.data().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_walking_appends_samples() {
        let f = fixture(ScriptedArchive::empty());
        f.sampler.push(T0, 3.0);
        let plot = new_plot(&f, PlotConfig::default());
        let series = plot.add_series("memory", f.sampler.clone());
        assert_eq!(series.data().len(), 1);
        assert!(settle(|| f.live.subscriptions() == 1).await);

        f.sampler.push(T0 + 1000, 4.0);
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(settle(|| series.data().len() == 2).await);
        assert_eq!(series.data()[1], Sample::new(T0 + 1000, 3.5));

        // Once the feed is gone the plot shows a single break.
        f.live.close_all();
        assert!(settle(|| !f.sampler.is_live()).await);
        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(1000)).await;
            settle(|| false).await;
        }
        assert_eq!(
            values(&series.data()[2..]),
            vec![(T0 + 2000, Some(4.0)), (T0 + 3000, None)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pinned_window_does_not_walk() {
        let f = fixture(ScriptedArchive::empty());
        f.sampler.push(T0, 3.0);
        let plot = new_plot(&f, PlotConfig::default());
        let series = plot.add_series("memory", f.sampler.clone());

        plot.scroll_left();
        let before = series.data();
        tokio::time::advance(Duration::from_millis(5000)).await;
        settle(|| false).await;
        assert_eq!(series.data(), before);
    }

    fn held_archive(start_ms: i64, values: &[f64]) -> (ScriptedArchive, tokio::sync::watch::Sender<bool>) {
        ScriptedArchive::new(
            vec![ScriptStep::Meta(start_ms), ScriptStep::Rows(values.to_vec())],
            Arc::new(ManualClock::new(T0)),
        )
        .held()
    }

    #[tokio::test]
    async fn test_reset_cancels_fill_of_replaced_window() {
        let (archive, release) = held_archive(T0 - 200_000, &[7.0; 5]);
        let f = fixture(archive);
        let plot = new_plot(&f, PlotConfig::default());
        let series = plot.add_series("memory", f.sampler.clone());
        settle(|| false).await;

        let replaced = plot.inner.state.lock().series[0].buffer.clone();
        assert!(plot.inner.state.lock().series[0]
            .fill
            .as_ref()
            .is_some_and(FillHandle::is_running));

        plot.reset(60.0, Some(T0_S - 5_000.0));
        let mut events = plot.subscribe();
        release.send_replace(true);
        settle(|| false).await;

        // The replaced window's rows would have landed at T0 - 200s.
        assert!(replaced.is_empty());
        assert!(series.data().is_empty());
        assert!(!drain(&mut events).contains(&PlotEvent::Refresh));
        assert!(plot.inner.state.lock().series[0]
            .fill
            .as_ref()
            .is_some_and(|fill| !fill.is_running() && !fill.is_cancelled()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_walking_keeps_old_samples_while_filling() {
        let (archive, release) = held_archive(T0 - 10_000, &[7.0; 3]);
        let f = fixture(archive);
        for i in 0..=5 {
            f.sampler.push(T0 - 5_000 + i * 1_000, 1.0);
        }
        let config = PlotConfig {
            min_range_s: 10.0,
            default_range_s: 10.0,
            ..PlotConfig::default()
        };
        let plot = new_plot(&f, config);
        let series = plot.add_series("memory", f.sampler.clone());
        settle(|| false).await;
        let first = series.data()[0].time_ms;
        assert!(first <= T0 - 4_000);

        for _ in 0..8 {
            tokio::time::advance(Duration::from_millis(1000)).await;
            settle(|| false).await;
        }
        assert_eq!(plot.plot_range().0, T0 - 2_000);
        assert_eq!(series.data()[0].time_ms, first);

        release.send_replace(true);
        assert!(settle(|| series.data()[0].time_ms == T0 - 10_000).await);
        assert!(settle(|| {
            plot.inner.state.lock().series[0]
                .fill
                .as_ref()
                .is_some_and(|fill| !fill.is_running())
        })
        .await);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(settle(|| series.data()[0].time_ms >= T0 - 1_000).await);
        assert_eq!(plot.plot_range().0, T0 - 1_000);
    }

    #[tokio::test]
    async fn test_zoom_in_flag_follows_archives() {
        let f = fixture(ScriptedArchive::with_values(0, &[1.0]));
        let plot = new_plot(&f, PlotConfig::default());
        assert!(!plot.flags().zoom_in);

        let mut events = plot.subscribe();
        let _series = plot.add_series("memory", f.sampler.clone());
        assert!(settle(|| plot.flags().zoom_in).await);
        assert!(drain(&mut events).contains(&PlotEvent::Changed));

        let f = fixture(ScriptedArchive::empty());
        let plot = new_plot(&f, PlotConfig::default());
        let _series = plot.add_series("memory", f.sampler.clone());
        settle(|| false).await;
        assert!(!plot.flags().zoom_in);
    }

    #[tokio::test]
    async fn test_series_order_and_hover() {
        let f = fixture(ScriptedArchive::empty());
        let plot = new_plot(&f, PlotConfig::default());
        let a = plot.add_series("a", f.sampler.clone());
        let b = plot.add_series("b", f.sampler.clone());

        let names = |plot: &PlotController| -> Vec<String> {
            plot.series().into_iter().map(|s| s.name).collect()
        };
        assert_eq!(names(&plot), vec!["a", "b"]);
        a.move_to_front();
        assert_eq!(names(&plot), vec!["b", "a"]);

        let mut events = plot.subscribe();
        plot.hover(Some(a.id()));
        b.hover(true);
        a.hover(false);
        assert_eq!(
            drain(&mut events),
            vec![
                PlotEvent::Hover { series: a.id(), hovered: true },
                PlotEvent::Hover { series: a.id(), hovered: false },
                PlotEvent::Hover { series: b.id(), hovered: true },
            ]
        );
        assert!(plot.series().iter().any(|s| s.name == "b" && s.hovered));

        assert!(b.remove());
        assert!(!b.remove());
        assert_eq!(names(&plot), vec!["a"]);
        assert!(b.data().is_empty());
        assert!(plot.series().iter().all(|s| !s.hovered));
    }

    #[tokio::test]
    async fn test_destroy_releases_samplers() {
        let f = fixture(ScriptedArchive::empty());
        let plot = new_plot(&f, PlotConfig::default());
        let series = plot.add_series("memory", f.sampler.clone());

        plot.destroy();
        assert!(series.data().is_empty());
        assert!(settle(|| Arc::strong_count(&f.sampler) == 1).await);
    }
}
