//! Observed absolute X/Y ranges and the override rule built from them.

use std::fmt::Write as _;

use serde::Serialize;

use crate::error::{ProbeError, Result};
use crate::input::{AxisInfo, Bus, DeviceInfo, EventKind, ProbeEvent};
use crate::progress::Progress;
use crate::session::EventHandler;

/// Smallest box containing every position seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            left: i32::MAX,
            right: i32::MIN,
            top: i32::MAX,
            bottom: i32::MIN,
        }
    }
}

impl Bounds {
    pub fn observe_x(&mut self, x: i32) {
        self.left = self.left.min(x);
        self.right = self.right.max(x);
    }

    pub fn observe_y(&mut self, y: i32) {
        self.top = self.top.min(y);
        self.bottom = self.bottom.max(y);
    }

    /// Both axes have seen at least one value.
    pub fn is_complete(&self) -> bool {
        self.left <= self.right && self.top <= self.bottom
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// The kernel-declared X and Y axes; touchpads without them are rejected.
pub fn require_abs_xy(info: &DeviceInfo) -> Result<(AxisInfo, AxisInfo)> {
    match (info.abs_x, info.abs_y) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(ProbeError::MissingAxes),
    }
}

#[derive(Default)]
pub struct TouchpadProbe {
    pub bounds: Bounds,
    progress: Option<Progress>,
}

impl TouchpadProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redraw the bounds after every report, spinner a space after the line.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress.with_separator(" "));
        self
    }

    /// Returns true on SYN_REPORT.
    pub fn process(&mut self, ev: &ProbeEvent) -> bool {
        match ev.kind {
            EventKind::Sync => true,
            EventKind::AbsX(x) => {
                self.bounds.observe_x(x);
                false
            }
            EventKind::AbsY(y) => {
                self.bounds.observe_y(y);
                false
            }
            _ => false,
        }
    }

    pub fn status_line(&self) -> String {
        let b = &self.bounds;
        format!(
            "Touchpad sends:\tx [{}..{}], y [{}..{}]",
            b.left, b.right, b.top, b.bottom
        )
    }
}

impl EventHandler for TouchpadProbe {
    fn handle(&mut self, ev: &ProbeEvent) {
        if self.process(ev) {
            let line = self.status_line();
            if let Some(progress) = self.progress.as_mut() {
                progress.redraw(&line);
            }
        }
    }
}

/// Physical size in millimetres, as given with `--touchpad-size`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizeMm {
    pub width: f64,
    pub height: f64,
}

impl std::str::FromStr for SizeMm {
    type Err = ProbeError;

    /// Accepts `WxH` with an optional `mm` suffix, e.g. `100x55mm`.
    fn from_str(s: &str) -> Result<Self> {
        let bad = || ProbeError::Argument(format!("invalid touchpad size '{s}', expected WxH"));
        let body = s.trim().trim_end_matches("mm");
        let (w, h) = body.split_once(['x', 'X']).ok_or_else(bad)?;
        let width: f64 = w.trim().parse().map_err(|_| bad())?;
        let height: f64 = h.trim().parse().map_err(|_| bad())?;
        if !(width > 0.0 && height > 0.0) {
            return Err(bad());
        }
        Ok(Self { width, height })
    }
}

/// How the suggested rule identifies the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMatch {
    /// `evdev:input:b<bus>v<vendor>p<product>*`
    Id { bus: u16, vendor: u16, product: u16 },
    /// `evdev:name:<name>:<dmi modalias>*`
    Dmi { name: String, modalias: String },
}

impl DeviceMatch {
    /// External buses carry stable ids; built-in touchpads are matched on
    /// the machine's DMI modalias instead.
    pub fn for_device(info: &DeviceInfo, dmi_modalias: Option<&str>) -> Self {
        match info.bus {
            Bus::Usb | Bus::Bluetooth => DeviceMatch::Id {
                bus: info.bus.raw(),
                vendor: info.vendor,
                product: info.product,
            },
            _ => DeviceMatch::Dmi {
                name: info.name.clone(),
                modalias: dmi_modalias.unwrap_or("dmi:").trim().to_string(),
            },
        }
    }
}

impl std::fmt::Display for DeviceMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceMatch::Id {
                bus,
                vendor,
                product,
            } => write!(f, "evdev:input:b{bus:04X}v{vendor:04X}p{product:04X}*"),
            DeviceMatch::Dmi { name, modalias } => write!(f, "evdev:name:{name}:{modalias}*"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TouchpadSummary {
    pub name: String,
    pub path: String,
    pub kernel_x: AxisInfo,
    pub kernel_y: AxisInfo,
    /// `None` when no touch was seen on both axes.
    pub observed: Option<Bounds>,
    pub kernel_size_mm: Option<(i32, i32)>,
    pub user_size_mm: Option<SizeMm>,
    /// Units per millimetre used in the rule; `None` when unknown.
    pub resolution: (Option<i32>, Option<i32>),
    pub rule: Option<String>,
}

impl TouchpadSummary {
    pub fn new(
        info: &DeviceInfo,
        (x, y): (AxisInfo, AxisInfo),
        bounds: &Bounds,
        user_size: Option<SizeMm>,
        dmi_modalias: Option<&str>,
    ) -> Self {
        let kernel_size_mm = (x.resolution > 0 && y.resolution > 0).then(|| {
            (
                (x.maximum - x.minimum) / x.resolution,
                (y.maximum - y.minimum) / y.resolution,
            )
        });

        let observed = bounds.is_complete().then_some(*bounds);
        let resolution = match (observed, user_size) {
            (Some(b), Some(size)) => (
                units_per_mm(b.width(), size.width),
                units_per_mm(b.height(), size.height),
            ),
            _ => (
                (x.resolution > 0).then_some(x.resolution),
                (y.resolution > 0).then_some(y.resolution),
            ),
        };

        let rule = observed.map(|b| {
            let id = DeviceMatch::for_device(info, dmi_modalias);
            override_rule(&id, &b, resolution, info.has_mt_position)
        });

        Self {
            name: info.name.clone(),
            path: info.path.display().to_string(),
            kernel_x: x,
            kernel_y: y,
            observed,
            kernel_size_mm,
            user_size_mm: user_size,
            resolution,
            rule,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let Some(b) = self.observed else {
            out.push_str("No touch was detected, no rule to suggest.\n");
            return out;
        };

        if let Some((w, h)) = self.kernel_size_mm {
            let _ = writeln!(out, "Touchpad size as listed by the kernel: {w}x{h}mm");
        }
        if let Some(size) = self.user_size_mm {
            let _ = writeln!(
                out,
                "User-specified touchpad size: {:.0}x{:.0}mm",
                size.width, size.height
            );
        }
        let _ = writeln!(out, "Calculated ranges: {}/{}", b.width(), b.height());
        out.push('\n');
        out.push_str("Suggested udev rule:\n");
        if let Some(rule) = &self.rule {
            out.push_str(rule);
        }
        out
    }
}

fn units_per_mm(units: i32, mm: f64) -> Option<i32> {
    let res = (f64::from(units) / mm).round() as i32;
    (res > 0).then_some(res)
}

/// hwdb `EVDEV_ABS_*` override for the observed ranges.
pub fn override_rule(
    id: &DeviceMatch,
    b: &Bounds,
    (xres, yres): (Option<i32>, Option<i32>),
    multitouch: bool,
) -> String {
    let res = |r: Option<i32>| r.map(|r| r.to_string()).unwrap_or_default();
    let x = format!("{}:{}:{}", b.left, b.right, res(xres));
    let y = format!("{}:{}:{}", b.top, b.bottom, res(yres));

    let mut out = String::new();
    out.push_str("# <Laptop model description goes here>\n");
    let _ = writeln!(out, "{id}");
    let _ = writeln!(out, " EVDEV_ABS_00={x}");
    let _ = writeln!(out, " EVDEV_ABS_01={y}");
    if multitouch {
        let _ = writeln!(out, " EVDEV_ABS_35={x}");
        let _ = writeln!(out, " EVDEV_ABS_36={y}");
    }
    out
}
