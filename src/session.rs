//! The blocking measurement loop shared by both tools.

use std::io;

use log::{debug, info};

use crate::error::{ProbeError, Result};
use crate::input::{EventKind, ProbeEvent};

/// Something that yields queued input events without blocking.
///
/// `read_batch` appends whatever is queued to `out` and returns
/// `ErrorKind::WouldBlock` once the queue is empty.
pub trait EventSource {
    fn read_batch(&mut self, out: &mut Vec<ProbeEvent>) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Readable,
    Interrupted,
}

/// Blocks until the device is readable or the user asked to stop.
pub trait Waiter {
    fn wait(&mut self) -> io::Result<Wake>;
}

pub trait EventHandler {
    fn handle(&mut self, ev: &ProbeEvent);
}

/// Runs until interrupted. Events are handed to `handler` in delivery
/// order; a dropped-events marker or a read error ends the session.
pub fn run<S, W, H>(source: &mut S, waiter: &mut W, handler: &mut H) -> Result<()>
where
    S: EventSource + ?Sized,
    W: Waiter + ?Sized,
    H: EventHandler + ?Sized,
{
    let mut batch = Vec::with_capacity(64);
    info!("session started");

    loop {
        match waiter.wait().map_err(ProbeError::Read)? {
            Wake::Interrupted => {
                info!("interrupted, stopping");
                return Ok(());
            }
            Wake::Readable => drain(source, handler, &mut batch)?,
        }
    }
}

fn drain<S, H>(source: &mut S, handler: &mut H, batch: &mut Vec<ProbeEvent>) -> Result<()>
where
    S: EventSource + ?Sized,
    H: EventHandler + ?Sized,
{
    loop {
        batch.clear();
        match source.read_batch(batch) {
            Ok(()) if batch.is_empty() => return Ok(()),
            Ok(()) => {
                for ev in batch.iter() {
                    if ev.kind == EventKind::Dropped {
                        return Err(ProbeError::Desync);
                    }
                    handler.handle(ev);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                debug!("read interrupted, retrying");
            }
            Err(e) => return Err(ProbeError::Read(e)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;

    fn rel(t: u64, v: i32) -> ProbeEvent {
        ProbeEvent::new(t, EventKind::RelX(v))
    }

    #[test]
    fn interrupt_before_any_data() {
        let mut src = ScriptedSource::default();
        let mut waiter = ScriptedWaiter::new([Wake::Interrupted]);
        let mut rec = Recorder::default();
        run(&mut src, &mut waiter, &mut rec).unwrap();
        assert!(rec.seen.is_empty());
        assert_eq!(waiter.calls, 1);
    }

    #[test]
    fn drains_every_queued_batch_in_order() {
        let mut src = ScriptedSource::default();
        src.push(vec![rel(1, 1), rel(2, 2)]);
        src.push(vec![rel(3, 3)]);
        src.push_would_block();
        src.push(vec![rel(4, 4)]);

        let mut waiter = ScriptedWaiter::new([Wake::Readable, Wake::Readable]);
        let mut rec = Recorder::default();
        run(&mut src, &mut waiter, &mut rec).unwrap();

        let times: Vec<u64> = rec.seen.iter().map(|e| e.time_us).collect();
        assert_eq!(times, vec![1, 2, 3, 4]);
        assert_eq!(waiter.calls, 3);
    }

    #[test]
    fn dropped_events_end_the_session() {
        let mut src = ScriptedSource::default();
        src.push(vec![
            rel(1, 1),
            ProbeEvent::new(2, EventKind::Dropped),
            rel(3, 3),
        ]);
        let mut waiter = ScriptedWaiter::new([Wake::Readable, Wake::Readable]);
        let mut rec = Recorder::default();

        let err = run(&mut src, &mut waiter, &mut rec).unwrap_err();
        assert!(matches!(err, ProbeError::Desync));
        assert_eq!(err.exit_status(), 1);
        assert_eq!(rec.seen.len(), 1);
        assert_eq!(waiter.calls, 1);
    }

    #[test]
    fn read_errors_are_fatal() {
        let mut src = ScriptedSource::default();
        src.reads
            .push_back(Err(io::Error::from_raw_os_error(libc::ENODEV)));
        let mut waiter = ScriptedWaiter::new([Wake::Readable]);
        let mut rec = Recorder::default();

        let err = run(&mut src, &mut waiter, &mut rec).unwrap_err();
        assert!(matches!(err, ProbeError::Read(_)));
    }

    #[test]
    fn empty_read_ends_the_drain_pass() {
        let mut src = ScriptedSource::default();
        src.push(vec![]);
        src.push(vec![rel(5, 1)]);
        let mut waiter = ScriptedWaiter::new([Wake::Readable, Wake::Readable]);
        let mut rec = Recorder::default();
        run(&mut src, &mut waiter, &mut rec).unwrap();
        assert_eq!(rec.seen, vec![rel(5, 1)]);
    }
}
