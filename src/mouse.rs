//! Relative-X distance and peak event frequency for the DPI probe.

use std::fmt::Write as _;

use log::debug;
use serde::Serialize;

use crate::config::DpiTable;
use crate::input::{DeviceInfo, EventKind, ProbeEvent};
use crate::progress::Progress;
use crate::session::EventHandler;

/// Number of SYN_REPORT timestamps kept for the frequency estimate.
pub const WINDOW_SIZE: usize = 32;

/// Ring of the most recent report timestamps, in microseconds.
#[derive(Debug, Clone)]
pub struct EventWindow {
    times: [f64; WINDOW_SIZE],
    index: usize,
    valid: bool,
}

impl Default for EventWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl EventWindow {
    pub fn new() -> Self {
        Self {
            times: [0.0; WINDOW_SIZE],
            index: 0,
            valid: false,
        }
    }

    pub fn push(&mut self, time_us: u64) {
        self.times[self.index] = time_us as f64;
        self.index += 1;
        if self.index == WINDOW_SIZE {
            self.valid = true;
            self.index = 0;
        }
    }

    /// Restarts filling from slot 0. Stale entries stay in the ring but are
    /// not evaluated until it has been filled again.
    pub fn invalidate(&mut self) {
        self.index = 0;
        self.valid = false;
    }

    /// True once every slot has been written since the last invalidation.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn frequency(&self) -> Option<f64> {
        if self.valid {
            estimate_frequency(&self.times)
        } else {
            None
        }
    }
}

/// Median inter-event interval of a timestamp ring, as Hz.
///
/// Only forward pairs with a strictly increasing timestamp contribute, which
/// drops the wrap-around pair (newest to oldest) and duplicate timestamps.
pub fn estimate_frequency(times: &[f64; WINDOW_SIZE]) -> Option<f64> {
    let mut diffs: Vec<f64> = (0..WINDOW_SIZE)
        .filter_map(|i| {
            let cur = times[i];
            let next = times[(i + 1) % WINDOW_SIZE];
            (cur < next).then(|| next - cur)
        })
        .take(WINDOW_SIZE - 1)
        .collect();

    if diffs.is_empty() {
        return None;
    }
    diffs.sort_by(f64::total_cmp);

    let median = diffs[diffs.len() / 2];
    Some(1_000_000.0 / median)
}

/// Running totals since the last idle reset.
#[derive(Debug, Clone, Default)]
pub struct Measurements {
    pub distance: i64,
    pub frequency: f64,
    last_us: u64,
}

pub struct MouseProbe {
    pub measurements: Measurements,
    window: EventWindow,
    idle_reset_us: u64,
    progress: Option<Progress>,
}

impl MouseProbe {
    pub fn new(idle_reset_us: u64) -> Self {
        Self {
            measurements: Measurements::default(),
            window: EventWindow::new(),
            idle_reset_us,
            progress: None,
        }
    }

    /// Redraw the progress line on stdout after every report.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn window(&self) -> &EventWindow {
        &self.window
    }

    /// Returns true when the event completed a report that was not a reset.
    pub fn process(&mut self, ev: &ProbeEvent) -> bool {
        match ev.kind {
            EventKind::Sync => self.on_sync(ev.time_us),
            EventKind::RelX(dx) => {
                self.measurements.distance += i64::from(dx);
                false
            }
            _ => false,
        }
    }

    fn on_sync(&mut self, now_us: u64) -> bool {
        let m = &mut self.measurements;
        let last_us = m.last_us;
        m.last_us = now_us;

        if now_us.saturating_sub(last_us) >= self.idle_reset_us {
            if last_us != 0 {
                debug!("idle for {}us, resetting", now_us - last_us);
            }
            m.frequency = 0.0;
            m.distance = 0;
            self.window.invalidate();
            return false;
        }

        self.window.push(now_us);
        if let Some(freq) = self.window.frequency() {
            m.frequency = m.frequency.max(freq);
        }
        true
    }

    pub fn status_line(&self) -> String {
        format!(
            "Covered distance in device units: {:8} at frequency {:3.1}Hz",
            self.measurements.distance.abs(),
            self.measurements.frequency
        )
    }
}

impl EventHandler for MouseProbe {
    fn handle(&mut self, ev: &ProbeEvent) {
        if self.process(ev) {
            let line = self.status_line();
            if let Some(progress) = self.progress.as_mut() {
                progress.redraw(&line);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DpiRow {
    pub dpi: u32,
    pub inches: f64,
    pub millimeters: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MouseSummary {
    pub name: String,
    pub path: String,
    pub distance: i64,
    pub frequency_hz: u32,
    pub table: Vec<DpiRow>,
    pub hwdb_entry: String,
}

impl MouseSummary {
    pub fn new(info: &DeviceInfo, m: &Measurements, table: &DpiTable) -> Self {
        let distance = m.distance.abs();
        let frequency_hz = m.frequency as u32;
        Self {
            name: info.name.clone(),
            path: info.path.display().to_string(),
            distance,
            frequency_hz,
            table: dpi_rows(distance, table),
            hwdb_entry: hwdb_entry(info, frequency_hz),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Estimated sampling frequency: {}Hz", self.frequency_hz);
        out.push_str(
            "To calculate resolution, measure physical distance covered\n\
             and look up the matching resolution in the table below\n",
        );
        for row in &self.table {
            let _ = writeln!(
                out,
                "{:8}mm\t{:8.2}in\t{:8}dpi",
                row.millimeters, row.inches, row.dpi
            );
        }
        let _ = writeln!(
            out,
            "If your resolution is not in the list, calculate it with:\n\
             \tresolution={d}/inches, or\n\
             \tresolution={d} * 25.4/mm",
            d = self.distance
        );
        out.push('\n');
        out.push_str("Entry for hwdb match (replace XXX with the resolution in DPI):\n");
        out.push_str(&self.hwdb_entry);
        out
    }
}

/// Physical distance the measured device units correspond to at each DPI.
pub fn dpi_rows(distance: i64, table: &DpiTable) -> Vec<DpiRow> {
    table
        .resolutions()
        .map(|dpi| {
            let inches = distance as f64 / f64::from(dpi);
            DpiRow {
                dpi,
                inches,
                millimeters: (inches * 25.4) as i64,
            }
        })
        .collect()
}

pub fn hwdb_entry(info: &DeviceInfo, frequency_hz: u32) -> String {
    format!(
        "mouse:{}:v{:04x}p{:04x}:name:{}:\n MOUSE_DPI=XXX@{}\n",
        info.bus.hwdb_name(),
        info.vendor,
        info.product,
        info.name,
        frequency_hz
    )
}
