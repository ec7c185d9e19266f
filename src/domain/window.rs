// Plot window domain model
use serde::Serialize;

pub const MINUTE: f64 = 60.0;
pub const HOUR: f64 = 60.0 * MINUTE;
pub const DAY: f64 = 24.0 * HOUR;

/// Ranges `zoom_out` walks through when there is no zoom history.
pub const ZOOM_STEPS: [f64; 7] = [
    5.0 * MINUTE,
    HOUR,
    6.0 * HOUR,
    DAY,
    7.0 * DAY,
    30.0 * DAY,
    365.0 * DAY,
];

/// Walk periods above this never schedule a timer.
pub const MAX_WALK_INTERVAL_MS: i64 = 2_000_000_000;

/// What slice of time a plot displays. `stop_s == None` means the window
/// ends at "now" and walks forward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Window {
    pub range_s: f64,
    pub stop_s: Option<f64>,
}

impl Window {
    pub fn walking(range_s: f64) -> Self {
        Self {
            range_s,
            stop_s: None,
        }
    }

    pub fn pinned(range_s: f64, stop_s: f64) -> Self {
        Self {
            range_s,
            stop_s: Some(stop_s),
        }
    }

    pub fn is_walking(&self) -> bool {
        self.stop_s.is_none()
    }

    /// Applies the range floor and the snap-to-now rule.
    ///
    /// A range below `min_range_s` is widened to the floor; a pinned window is
    /// moved forward by half the difference so it stays centered on what was
    /// asked for. A stop within `snap_s` of `now_s` turns back into a walking
    /// window.
    pub fn normalized(self, min_range_s: f64, snap_s: f64, now_s: f64) -> Self {
        let mut range_s = self.range_s;
        let mut stop_s = self.stop_s;

        if range_s < min_range_s {
            if let Some(stop) = stop_s.as_mut() {
                *stop += (min_range_s - range_s) / 2.0;
            }
            range_s = min_range_s;
        }

        if stop_s.is_some_and(|stop| stop >= now_s - snap_s) {
            stop_s = None;
        }

        Self { range_s, stop_s }
    }
}

/// Smallest ladder step strictly greater than `range_s`, or the largest step.
pub fn next_zoom_step(range_s: f64) -> f64 {
    ZOOM_STEPS
        .iter()
        .copied()
        .find(|step| *step > range_s)
        .unwrap_or(ZOOM_STEPS[ZOOM_STEPS.len() - 1])
}

/// Sample spacing for a window: about `points` samples per window, rounded
/// up to whole seconds. Fewer than one point per window counts as one.
pub fn step_for_range(range_s: f64, points: f64) -> i64 {
    let points = if points >= 1.0 { points } else { 1.0 };
    let seconds = (range_s / points).ceil();
    if !(seconds >= 1.0) {
        return 1000;
    }
    // Float to int casts saturate.
    (seconds as i64).saturating_mul(1000)
}

/// Window plus zoom history, and the transitions between windows.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoomState {
    window: Window,
    history: Vec<f64>,
    min_range_s: f64,
    snap_s: f64,
}

impl ZoomState {
    pub fn new(window: Window, min_range_s: f64, snap_s: f64) -> Self {
        Self {
            window,
            history: Vec::new(),
            min_range_s,
            snap_s,
        }
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn reset(&mut self, range_s: f64, stop_s: Option<f64>, now_s: f64) -> Window {
        self.window = Window { range_s, stop_s }.normalized(self.min_range_s, self.snap_s, now_s);
        self.window
    }

    /// Switches to `range_s` and forgets the zoom history.
    pub fn set_range(&mut self, range_s: f64, now_s: f64) -> Window {
        self.history.clear();
        self.reset(range_s, self.window.stop_s, now_s)
    }

    pub fn zoom_in(&mut self, range_s: f64, stop_s: Option<f64>, now_s: f64) -> Window {
        self.history.push(self.window.range_s);
        self.reset(range_s, stop_s, now_s)
    }

    /// Back to the previous range, or up the ladder when there is none. A
    /// pinned window grows around its center.
    pub fn zoom_out(&mut self, now_s: f64) -> Window {
        let range_s = self
            .history
            .pop()
            .unwrap_or_else(|| next_zoom_step(self.window.range_s));
        let stop_s = self
            .window
            .stop_s
            .map(|stop| stop + (range_s - self.window.range_s) / 2.0);
        self.reset(range_s, stop_s, now_s)
    }

    pub fn goto_now(&mut self, now_s: f64) -> Window {
        self.reset(self.window.range_s, None, now_s)
    }

    /// Moves a tenth of the range back in time, pinning a walking window
    /// at `now_s` first.
    pub fn scroll_left(&mut self, now_s: f64) -> Window {
        let step = self.window.range_s / 10.0;
        let stop_s = self.window.stop_s.unwrap_or(now_s) - step;
        self.reset(self.window.range_s, Some(stop_s), now_s)
    }

    /// Moves a tenth of the range forward. A walking window is left alone.
    pub fn scroll_right(&mut self, now_s: f64) -> Option<Window> {
        let stop_s = self.window.stop_s?;
        let step = self.window.range_s / 10.0;
        Some(self.reset(self.window.range_s, Some(stop_s + step), now_s))
    }
}

/// Derived UI state, recomputed after every window transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlotFlags {
    pub zoom_in: bool,
    pub zoom_out: bool,
    pub scroll_left: bool,
    pub scroll_right: bool,
}

impl PlotFlags {
    pub fn compute(window: &Window, archives: bool) -> Self {
        Self {
            zoom_in: archives,
            zoom_out: true,
            scroll_left: true,
            scroll_right: !window.is_walking(),
        }
    }
}
