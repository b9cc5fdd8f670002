use std::{
    env,
    ffi::OsString,
    fmt,
    io::{self, Write},
    os::fd::RawFd,
    path::PathBuf,
    process::ExitCode,
};

use log::{debug, warn};
use pico_args::Arguments;

use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};
use crate::input::{EvdevDevice, ProbeDevice};
use crate::mouse::{MouseProbe, MouseSummary};
use crate::progress::Progress;
use crate::session::{self, Waiter};
use crate::touchpad::{SizeMm, TouchpadProbe, TouchpadSummary, require_abs_xy};
use crate::wait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    MouseDpi,
    TouchpadEdges,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::MouseDpi => "mouse-dpi-tool",
            Tool::TouchpadEdges => "touchpad-edge-detector",
        }
    }

    fn usage(self) -> String {
        match self {
            Tool::MouseDpi => format!(
                "Usage: {} [--config FILE] [--json] /dev/input/event0\n\
                 \n\
                 This tool reads relative events from the kernel and calculates\n\
                 the distance covered and maximum frequency of the incoming events.\n\
                 Some mouse devices provide dynamic frequencies, it is\n\
                 recommended to measure multiple times to obtain the highest value.\n",
                self.name()
            ),
            Tool::TouchpadEdges => format!(
                "Usage: {} [--touchpad-size WxH[mm]] [--config FILE] [--json] /dev/input/event0\n\
                 \n\
                 This tool reads the touchpad events from the kernel and calculates\n\
                 the minimum and maximum for the x and y coordinates, respectively.\n\
                 With --touchpad-size the suggested rule carries a resolution\n\
                 computed from the physical size in mm.\n",
                self.name()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub path: PathBuf,
    pub config: Option<PathBuf>,
    pub json: bool,
    pub touchpad_size: Option<SizeMm>,
}

pub fn parse_args(tool: Tool, args: Vec<OsString>) -> Result<Options> {
    let mut pargs = Arguments::from_vec(args);

    if pargs.contains(["-h", "--help"]) {
        return Err(ProbeError::Usage);
    }

    let config: Option<PathBuf> = pargs
        .opt_value_from_str("--config")
        .map_err(|_| ProbeError::Usage)?;
    let json = pargs.contains("--json");

    let touchpad_size = if tool == Tool::TouchpadEdges {
        let raw: Option<String> = pargs
            .opt_value_from_str("--touchpad-size")
            .map_err(|_| ProbeError::Usage)?;
        raw.map(|s| s.parse::<SizeMm>()).transpose()?
    } else {
        None
    };

    // First free arg is the device node
    let path: String = match pargs.opt_free_from_str() {
        Ok(Some(p)) => p,
        _ => return Err(ProbeError::Usage),
    };
    if path.starts_with('-') {
        return Err(ProbeError::Usage);
    }

    let rest = pargs.finish();
    if !rest.is_empty() {
        warn!("ignoring extra arguments: {rest:?}");
    }

    Ok(Options {
        path: PathBuf::from(path),
        config,
        json,
        touchpad_size,
    })
}

/// Entry point shared by both binaries.
pub fn run(tool: Tool) -> ExitCode {
    let args: Vec<OsString> = env::args_os().skip(1).collect();
    match execute(tool, args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(ProbeError::Usage) => {
            print!("{}", tool.usage());
            ExitCode::from(ProbeError::Usage.exit_status())
        }
        Err(e) => {
            eprintln!("{e}");
            if let Some(hint) = e.hint() {
                eprintln!("{hint}");
            }
            ExitCode::from(e.exit_status())
        }
    }
}

fn execute(tool: Tool, args: Vec<OsString>) -> Result<()> {
    let opts = parse_args(tool, args)?;
    let cfg = ProbeConfig::load(opts.config.as_deref())
        .map_err(|e| ProbeError::Config(format!("{e:#}")))?;
    debug!("{} on {} with {cfg:?}", tool.name(), opts.path.display());

    let mut dev = EvdevDevice::open(&opts.path)?;
    // stdout carries only the summary document in JSON mode
    let progress = if opts.json {
        Progress::stderr()
    } else {
        Progress::stdout()
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match tool {
        Tool::MouseDpi => run_mouse(
            &mut dev,
            wait::platform_waiter,
            &opts,
            &cfg,
            progress,
            &mut out,
        ),
        Tool::TouchpadEdges => run_touchpad(
            &mut dev,
            wait::platform_waiter,
            &opts,
            &cfg,
            progress,
            &mut out,
        ),
    }
}

pub fn run_mouse<D, W, F>(
    dev: &mut D,
    make_waiter: F,
    opts: &Options,
    cfg: &ProbeConfig,
    progress: Progress,
    out: &mut dyn Write,
) -> Result<()>
where
    D: ProbeDevice,
    W: Waiter,
    F: FnOnce(RawFd) -> io::Result<W>,
{
    dev.probe_grab()?;
    let info = dev.info().clone();

    note(
        out,
        opts.json,
        format_args!(
            "Mouse {} on {}\n\
             Move the device 250mm/10in or more along the x-axis.\n\
             Pause {} seconds before movement to reset, Ctrl+C to exit.\n",
            info.name,
            info.path.display(),
            cfg.idle_reset_ms as f64 / 1000.0
        ),
    )?;

    let mut waiter = make_waiter(dev.as_raw_fd()).map_err(ProbeError::Read)?;
    let mut probe = MouseProbe::new(cfg.idle_reset_us()).with_progress(progress);
    let rc = session::run(dev, &mut waiter, &mut probe);

    note(out, opts.json, format_args!("\n"))?;
    let summary = MouseSummary::new(&info, &probe.measurements, &cfg.dpi_table);
    print_summary(out, &summary, summary.render(), opts.json)?;
    rc
}

pub fn run_touchpad<D, W, F>(
    dev: &mut D,
    make_waiter: F,
    opts: &Options,
    cfg: &ProbeConfig,
    progress: Progress,
    out: &mut dyn Write,
) -> Result<()>
where
    D: ProbeDevice,
    W: Waiter,
    F: FnOnce(RawFd) -> io::Result<W>,
{
    dev.probe_grab()?;
    let info = dev.info().clone();
    let (x, y) = require_abs_xy(&info)?;

    note(
        out,
        opts.json,
        format_args!(
            "Touchpad {} on {}\n\
             Move one finger around the touchpad to detect the actual edges\n\
             Kernel says:\tx [{}..{}], y [{}..{}]\n",
            info.name,
            info.path.display(),
            x.minimum,
            x.maximum,
            y.minimum,
            y.maximum
        ),
    )?;

    let mut waiter = make_waiter(dev.as_raw_fd()).map_err(ProbeError::Read)?;
    let mut probe = TouchpadProbe::new().with_progress(progress);
    let rc = session::run(dev, &mut waiter, &mut probe);

    note(out, opts.json, format_args!("\n"))?;
    let dmi = cfg.read_dmi_modalias();
    let summary = TouchpadSummary::new(
        &info,
        (x, y),
        &probe.bounds,
        opts.touchpad_size,
        dmi.as_deref(),
    );
    print_summary(out, &summary, summary.render(), opts.json)?;
    rc
}

/// Writes interactive text to `out`, or to stderr when `out` carries JSON.
fn note(out: &mut dyn Write, json: bool, text: fmt::Arguments<'_>) -> Result<()> {
    let res = if json {
        let mut err = io::stderr().lock();
        err.write_fmt(text).and_then(|()| err.flush())
    } else {
        out.write_fmt(text).and_then(|()| out.flush())
    };
    res.map_err(ProbeError::Output)
}

fn print_summary<T: serde::Serialize>(
    out: &mut dyn Write,
    summary: &T,
    text: String,
    json: bool,
) -> Result<()> {
    let body = if json {
        let mut s = serde_json::to_string_pretty(summary)
            .map_err(|e| ProbeError::Output(io::Error::other(e)))?;
        s.push('\n');
        s
    } else {
        text
    };
    out.write_all(body.as_bytes()).map_err(ProbeError::Output)?;
    out.flush().map_err(ProbeError::Output)
}
