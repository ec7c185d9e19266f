// Axis tick generation for merged series
use crate::domain::sample::Sample;
use crate::domain::window::{DAY, HOUR, MINUTE};
use chrono::{DateTime, Datelike, FixedOffset, TimeZone};
use serde::Serialize;

const TIME_TICK_SIZES_S: [f64; 13] = [
    MINUTE,
    5.0 * MINUTE,
    10.0 * MINUTE,
    30.0 * MINUTE,
    HOUR,
    6.0 * HOUR,
    12.0 * HOUR,
    DAY,
    7.0 * DAY,
    30.0 * DAY,
    183.0 * DAY,
    365.0 * DAY,
    10.0 * 365.0 * DAY,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum DatePart {
    Year,
    Month,
    Day,
    HourMinute,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeTicks {
    pub ticks: Vec<i64>,
    pub start: i64,
    pub end: i64,
    pub format_begin: DatePart,
    offset: FixedOffset,
}

impl TimeTicks {
    /// Label for a tick. Date parts that match the current date are left
    /// out; the day goes on its own line.
    pub fn format(&self, time_ms: i64) -> String {
        let Some(d) = to_local(time_ms, &self.offset) else {
            return String::new();
        };

        let mut label = String::new();
        if self.format_begin <= DatePart::Year {
            label.push_str(&format!("{} ", d.year()));
        }
        if self.format_begin <= DatePart::Month {
            label.push_str(&format!("{} ", d.format("%b")));
        }
        if self.format_begin <= DatePart::Day {
            label.push_str(&format!("{}\n", d.day()));
        }
        label.push_str(&d.format("%H:%M").to_string());
        label
    }

    pub fn labels(&self) -> Vec<String> {
        self.ticks.iter().map(|t| self.format(*t)).collect()
    }
}

/// Time axis ticks for the span of the first series. Picks the smallest
/// tick size that yields fewer than ten ticks.
pub fn time_ticks(series: &[Vec<Sample>], now_ms: i64, offset: FixedOffset) -> Option<TimeTicks> {
    let first = series.first()?;
    let start = first.first()?.time_ms;
    let end = first.last()?.time_ms;

    let span_s = (end - start) as f64 / 1000.0;
    let size_s = TIME_TICK_SIZES_S
        .iter()
        .copied()
        .find(|size| span_s / size < 10.0)
        .unwrap_or(TIME_TICK_SIZES_S[TIME_TICK_SIZES_S.len() - 1]);
    let size = (size_s * 1000.0) as i64;

    let format_begin = match (to_local(start, &offset), to_local(now_ms, &offset)) {
        (Some(l), Some(n)) if l.year() == n.year() => {
            if l.month() == n.month() && l.day() == n.day() {
                DatePart::HourMinute
            } else {
                // Never show the day without its month.
                DatePart::Month
            }
        }
        _ => DatePart::Year,
    };

    let mut ticks = Vec::new();
    let mut t = start.div_euclid(size) * size;
    if t < start {
        t += size;
    }
    while t < end {
        ticks.push(t);
        t += size;
    }

    Some(TimeTicks {
        ticks,
        start,
        end,
        format_begin,
        offset,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueTicks {
    pub ticks: Vec<f64>,
    pub unit: String,
    pub unit_scale: f64,
    pub max: f64,
}

impl ValueTicks {
    pub fn format(&self, value: f64) -> String {
        format_number(value / self.unit_scale)
    }

    pub fn labels(&self) -> Vec<String> {
        self.ticks.iter().map(|t| self.format(*t)).collect()
    }
}

/// Byte-rate ticks for the last series: around four ticks at round numbers
/// of a binary unit, never below 4 KiB/s full scale.
pub fn value_ticks(series: &[Vec<Sample>]) -> ValueTicks {
    let mut max = 4.0 * 1024.0;
    if let Some(last) = series.last() {
        for v in last.iter().filter_map(|s| s.value) {
            if v > max {
                max = v;
            }
        }
    }
    byte_rate_ticks(max)
}

/// Ticks from zero to `max` at round numbers of a binary unit.
pub fn byte_rate_ticks(max: f64) -> ValueTicks {
    let max = max.max(1.0);
    let mut unit = 1.0;
    while max > unit * 1024.0 {
        unit *= 1024.0;
    }

    let mut size = 10f64.powf((max / unit).log10().floor()) * unit;
    while max / size > 7.0 {
        size *= 2.0;
    }
    while max / size < 3.0 && size / unit >= 10.0 {
        size /= 2.0;
    }

    let mut ticks = Vec::new();
    let mut t = 0.0;
    while t <= max {
        ticks.push(t);
        t += size;
    }

    ValueTicks {
        ticks,
        unit: binary_unit(unit, "B/s"),
        unit_scale: unit,
        max,
    }
}

/// At most five ticks, spaced at a power of two.
pub fn memory_ticks(max: f64) -> Vec<f64> {
    if !(max > 0.0) {
        return Vec::new();
    }
    let size = 2f64.powf((max / 5.0).log2().ceil());
    let mut ticks = Vec::new();
    let mut t = 0.0;
    while t < max {
        ticks.push(t);
        t += size;
    }
    ticks
}

/// "14:03" for today, "Mar 2, 14:03" otherwise.
pub fn format_date_tick(time_ms: i64, now_ms: i64, offset: &FixedOffset) -> String {
    let (Some(d), Some(n)) = (to_local(time_ms, offset), to_local(now_ms, offset)) else {
        return String::new();
    };
    let time = d.format("%H:%M").to_string();
    if d.date_naive() == n.date_naive() {
        time
    } else {
        format!("{} {}, {}", d.format("%b"), d.day(), time)
    }
}

/// Human-readable window length, rounded up to the largest fitting unit.
pub fn format_range(seconds: f64) -> String {
    let units = [
        (365.0 * DAY, "year"),
        (30.0 * DAY, "month"),
        (7.0 * DAY, "week"),
        (DAY, "day"),
        (HOUR, "hour"),
    ];
    let (size, name) = units
        .iter()
        .copied()
        .find(|(size, _)| seconds >= *size)
        .unwrap_or((MINUTE, "minute"));

    let n = (seconds / size).ceil() as i64;
    if n == 1 {
        format!("{} {}", n, name)
    } else {
        format!("{} {}s", n, name)
    }
}

/// How the value axis maximum follows the data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AxisMax {
    /// Round the data maximum up to a multiple of the unit.
    Unit(f64),
    /// Follow the data, but never go below the floor.
    AtLeast(f64),
}

impl AxisMax {
    pub fn resolve(&self, data_max: Option<f64>) -> f64 {
        match *self {
            AxisMax::Unit(unit) => match data_max {
                Some(m) if m > 0.0 => (m / unit).ceil() * unit,
                _ => unit,
            },
            AxisMax::AtLeast(floor) => match data_max {
                Some(m) if m >= floor => m,
                _ => floor,
            },
        }
    }
}

/// Tick label formatting per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueFormat {
    Percent,
    Bytes,
    BitsPerSec,
    BytesPerSec,
}

impl ValueFormat {
    pub fn format(&self, value: f64) -> String {
        match self {
            ValueFormat::Percent => format!("{}%", format_number(value)),
            ValueFormat::Bytes => format_scaled(value, 1024.0, &["B", "KiB", "MiB", "GiB", "TiB"]),
            ValueFormat::BitsPerSec => {
                format_scaled(value * 8.0, 1000.0, &["bps", "Kbps", "Mbps", "Gbps", "Tbps"])
            }
            ValueFormat::BytesPerSec => {
                format_scaled(value, 1024.0, &["B/s", "KiB/s", "MiB/s", "GiB/s", "TiB/s"])
            }
        }
    }
}

fn format_scaled(value: f64, base: f64, units: &[&str]) -> String {
    let mut scaled = value;
    let mut idx = 0;
    while scaled.abs() >= base && idx + 1 < units.len() {
        scaled /= base;
        idx += 1;
    }
    format!("{} {}", format_number(scaled), units[idx])
}

fn binary_unit(scale: f64, suffix: &str) -> String {
    let prefixes = ["", "Ki", "Mi", "Gi", "Ti", "Pi"];
    let idx = (scale.log2() / 10.0).round() as usize;
    format!("{}{}", prefixes[idx.min(prefixes.len() - 1)], suffix)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else if value.abs() >= 100.0 {
        format!("{:.0}", value)
    } else {
        let s = format!("{:.1}", value);
        s.trim_end_matches(".0").to_string()
    }
}

fn to_local(time_ms: i64, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    offset.timestamp_millis_opt(time_ms).single()
}
