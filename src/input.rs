//! Input device access & event stream (evdev 0.13.2 compatible)

use std::{
    fs::OpenOptions,
    io,
    os::{
        fd::{AsRawFd, OwnedFd, RawFd},
        unix::fs::OpenOptionsExt,
    },
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use evdev::{
    AbsoluteAxisCode, EventType, InputEvent, RelativeAxisCode, SynchronizationCode,
    raw_stream::RawDevice,
};
use log::debug;
use serde::Serialize;

use crate::error::{ProbeError, Result};
use crate::session::EventSource;

/// The slice of an `input_event` the probes look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEvent {
    pub time_us: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// SYN_REPORT, end of a batch.
    Sync,
    /// SYN_DROPPED, the kernel buffer overflowed.
    Dropped,
    RelX(i32),
    /// ABS_X or ABS_MT_POSITION_X.
    AbsX(i32),
    /// ABS_Y or ABS_MT_POSITION_Y.
    AbsY(i32),
    Other,
}

impl ProbeEvent {
    pub fn new(time_us: u64, kind: EventKind) -> Self {
        Self { time_us, kind }
    }
}

impl From<&InputEvent> for ProbeEvent {
    fn from(ev: &InputEvent) -> Self {
        let time_us = ev
            .timestamp()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        let ty = ev.event_type();
        let code = ev.code();
        let kind = if ty == EventType::SYNCHRONIZATION {
            if code == SynchronizationCode::SYN_REPORT.0 {
                EventKind::Sync
            } else if code == SynchronizationCode::SYN_DROPPED.0 {
                EventKind::Dropped
            } else {
                EventKind::Other
            }
        } else if ty == EventType::RELATIVE && code == RelativeAxisCode::REL_X.0 {
            EventKind::RelX(ev.value())
        } else if ty == EventType::ABSOLUTE {
            match code {
                c if c == AbsoluteAxisCode::ABS_X.0
                    || c == AbsoluteAxisCode::ABS_MT_POSITION_X.0 =>
                {
                    EventKind::AbsX(ev.value())
                }
                c if c == AbsoluteAxisCode::ABS_Y.0
                    || c == AbsoluteAxisCode::ABS_MT_POSITION_Y.0 =>
                {
                    EventKind::AbsY(ev.value())
                }
                _ => EventKind::Other,
            }
        } else {
            EventKind::Other
        };

        Self { time_us, kind }
    }
}

/// Kernel bus identifiers from `linux/input.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bus {
    Pci,
    IsaPnp,
    Usb,
    Hil,
    Bluetooth,
    Virtual,
    Other(u16),
}

impl Bus {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0x01 => Bus::Pci,
            0x02 => Bus::IsaPnp,
            0x03 => Bus::Usb,
            0x04 => Bus::Hil,
            0x05 => Bus::Bluetooth,
            0x06 => Bus::Virtual,
            other => Bus::Other(other),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            Bus::Pci => 0x01,
            Bus::IsaPnp => 0x02,
            Bus::Usb => 0x03,
            Bus::Hil => 0x04,
            Bus::Bluetooth => 0x05,
            Bus::Virtual => 0x06,
            Bus::Other(raw) => raw,
        }
    }

    /// Name used in hwdb `mouse:` matches.
    pub fn hwdb_name(self) -> &'static str {
        match self {
            Bus::Pci => "pci",
            Bus::IsaPnp => "isapnp",
            Bus::Usb => "usb",
            Bus::Hil => "hil",
            Bus::Bluetooth => "bluetooth",
            Bus::Virtual => "virtual",
            Bus::Other(_) => "unknown bus type",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AxisInfo {
    pub minimum: i32,
    pub maximum: i32,
    /// Units per millimetre, 0 when the kernel does not know.
    pub resolution: i32,
}

/// Static metadata captured right after opening.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub bus: Bus,
    pub vendor: u16,
    pub product: u16,
    pub abs_x: Option<AxisInfo>,
    pub abs_y: Option<AxisInfo>,
    pub has_mt_position: bool,
}

pub struct EvdevDevice {
    dev: RawDevice,
    info: DeviceInfo,
}

impl EvdevDevice {
    /// Opens `path` read-only and non-blocking.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| ProbeError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let dev = RawDevice::from_fd(OwnedFd::from(file)).map_err(ProbeError::DeviceInfo)?;
        let info = read_info(&dev, path)?;
        debug!(
            "opened {} ({}): bus {:#06x} vendor {:#06x} product {:#06x}",
            info.name,
            path.display(),
            info.bus.raw(),
            info.vendor,
            info.product
        );
        Ok(Self { dev, info })
    }
}

/// An opened event node the probes can measure.
pub trait ProbeDevice: EventSource + AsRawFd {
    fn info(&self) -> &DeviceInfo;

    /// Grabs and immediately releases the device. Fails when another
    /// process holds a grab.
    fn probe_grab(&mut self) -> Result<()>;
}

impl ProbeDevice for EvdevDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn probe_grab(&mut self) -> Result<()> {
        if let Err(e) = self.dev.grab() {
            debug!("grab failed: {e}");
            return Err(ProbeError::Grab {
                path: self.info.path.clone(),
            });
        }
        if let Err(e) = self.dev.ungrab() {
            debug!("ungrab failed: {e}");
        }
        Ok(())
    }
}

fn read_info(dev: &RawDevice, path: &Path) -> Result<DeviceInfo> {
    let id = dev.input_id();

    let mut abs_x = None;
    let mut abs_y = None;
    let mut has_mt_position = false;
    if let Some(axes) = dev.supported_absolute_axes() {
        has_mt_position = axes.contains(AbsoluteAxisCode::ABS_MT_POSITION_X)
            && axes.contains(AbsoluteAxisCode::ABS_MT_POSITION_Y);

        if axes.contains(AbsoluteAxisCode::ABS_X) || axes.contains(AbsoluteAxisCode::ABS_Y) {
            for (code, abs) in dev.get_absinfo().map_err(ProbeError::DeviceInfo)? {
                let axis = AxisInfo {
                    minimum: abs.minimum(),
                    maximum: abs.maximum(),
                    resolution: abs.resolution(),
                };
                if code == AbsoluteAxisCode::ABS_X {
                    abs_x = Some(axis);
                } else if code == AbsoluteAxisCode::ABS_Y {
                    abs_y = Some(axis);
                }
            }
        }
    }

    Ok(DeviceInfo {
        path: path.to_path_buf(),
        name: dev.name().unwrap_or("unknown").to_string(),
        bus: Bus::from_raw(id.bus_type().0),
        vendor: id.vendor(),
        product: id.product(),
        abs_x,
        abs_y,
        has_mt_position,
    })
}

impl AsRawFd for EvdevDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.dev.as_raw_fd()
    }
}

impl EventSource for EvdevDevice {
    fn read_batch(&mut self, out: &mut Vec<ProbeEvent>) -> io::Result<()> {
        let events = self.dev.fetch_events()?;
        out.extend(events.map(|ev| ProbeEvent::from(&ev)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(ty: EventType, code: u16, value: i32) -> EventKind {
        ProbeEvent::from(&InputEvent::new(ty.0, code, value)).kind
    }

    #[test]
    fn relative_x_is_mapped() {
        assert_eq!(
            ev(EventType::RELATIVE, RelativeAxisCode::REL_X.0, -4),
            EventKind::RelX(-4)
        );
    }

    #[test]
    fn relative_y_is_ignored() {
        assert_eq!(
            ev(EventType::RELATIVE, RelativeAxisCode::REL_Y.0, 9),
            EventKind::Other
        );
    }

    #[test]
    fn single_and_multitouch_positions_share_an_axis() {
        assert_eq!(
            ev(EventType::ABSOLUTE, AbsoluteAxisCode::ABS_X.0, 100),
            EventKind::AbsX(100)
        );
        assert_eq!(
            ev(EventType::ABSOLUTE, AbsoluteAxisCode::ABS_MT_POSITION_X.0, 200),
            EventKind::AbsX(200)
        );
        assert_eq!(
            ev(EventType::ABSOLUTE, AbsoluteAxisCode::ABS_MT_POSITION_Y.0, 300),
            EventKind::AbsY(300)
        );
        assert_eq!(
            ev(EventType::ABSOLUTE, AbsoluteAxisCode::ABS_PRESSURE.0, 30),
            EventKind::Other
        );
    }

    #[test]
    fn sync_codes() {
        assert_eq!(
            ev(
                EventType::SYNCHRONIZATION,
                SynchronizationCode::SYN_REPORT.0,
                0
            ),
            EventKind::Sync
        );
        assert_eq!(
            ev(
                EventType::SYNCHRONIZATION,
                SynchronizationCode::SYN_DROPPED.0,
                0
            ),
            EventKind::Dropped
        );
    }

    #[test]
    fn bus_names() {
        assert_eq!(Bus::from_raw(0x03), Bus::Usb);
        assert_eq!(Bus::from_raw(0x03).hwdb_name(), "usb");
        assert_eq!(Bus::from_raw(0x05).hwdb_name(), "bluetooth");
        assert_eq!(Bus::from_raw(0x11).hwdb_name(), "unknown bus type");
        assert_eq!(Bus::from_raw(0x18).raw(), 0x18);
    }
}
