//! A pair of periodic timers driven by an injected scheduler.
//!
//! The scheduler is an injectable capability
//! (`schedule_periodic(interval, callback) -> cancel_handle`) rather than a
//! binding to any specific reactor; [`crate::testing::ManualScheduler`]
//! implements it over a fake clock so heartbeat behavior is testable
//! without real timers.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::error::StompError;

/// A handle that cancels whatever periodic registration produced it.
/// Cancellation is idempotent: calling `cancel` more than once is harmless.
pub trait CancelHandle {
    fn cancel(&mut self);
}

/// The one capability the heartbeat timer pair needs from its embedder:
/// register a callback to run every `interval`.
pub trait Scheduler {
    fn schedule_periodic(
        &mut self,
        interval: Duration,
        callback: Box<dyn FnMut()>,
    ) -> Box<dyn CancelHandle>;
}

/// The capability [`Heartbeat`] needs from the engine's embedder: a byte
/// sink for the heartbeat `\n`, and a way to surface a detected heartbeat
/// loss. [`crate::client::ClientHandler`] and [`crate::server::ServerHandler`]
/// both require this as a supertrait.
pub trait HeartbeatHost {
    fn send_bytes(&mut self, bytes: &[u8]);
    fn heartbeat_failed(&mut self, message: &str);
}

#[derive(Default)]
struct Flags {
    sent: bool,
    received: bool,
}

#[derive(Default)]
struct Handles {
    outgoing: Option<Box<dyn CancelHandle>>,
    incoming: Option<Box<dyn CancelHandle>>,
}

impl Handles {
    fn cancel_all(&mut self) {
        if let Some(mut h) = self.outgoing.take() {
            h.cancel();
        }
        if let Some(mut h) = self.incoming.take() {
            h.cancel();
        }
    }
}

/// The heartbeat timer pair for one session.
///
/// Constructed from a negotiated `(incoming_rate_ms, outgoing_rate_ms)` pair
/// (see [`Heartbeat::negotiate`]); `start` arms up to two periodic timers
/// through the injected [`Scheduler`].
pub struct Heartbeat<H: HeartbeatHost> {
    host: Rc<RefCell<H>>,
    outgoing_interval: Option<Duration>,
    incoming_interval: Option<Duration>,
    flags: Rc<RefCell<Flags>>,
    handles: Rc<RefCell<Handles>>,
}

impl<H: HeartbeatHost + 'static> Heartbeat<H> {
    /// Negotiates local rates from a peer's raw `heart-beat` header value
    /// (`"<cx>,<cy>"`) plus this side's own floors.
    ///
    /// `incoming_rate = max(cx, min_send_interval)` unless `cx == 0`, in
    /// which case it is `0` (no incoming heartbeat expected);
    /// `outgoing_rate` follows the same rule against `cy` and
    /// `desired_receive_interval`. See DESIGN.md for the rationale behind
    /// which floor applies to which direction.
    pub fn negotiate(
        rate: &str,
        min_send_interval: u32,
        desired_receive_interval: u32,
    ) -> Result<(u32, u32), StompError> {
        let mut parts = rate.splitn(2, ',');
        let cx: u32 = parts
            .next()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| StompError::protocol("Invalid heart-beat header"))?;
        let cy: u32 = parts
            .next()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| StompError::protocol("Invalid heart-beat header"))?;

        let incoming_rate = if cx > 0 { cx.max(min_send_interval) } else { 0 };
        let outgoing_rate = if cy > 0 { cy.max(desired_receive_interval) } else { 0 };
        Ok((incoming_rate, outgoing_rate))
    }

    pub fn new(host: Rc<RefCell<H>>, incoming_rate_ms: u32, outgoing_rate_ms: u32) -> Self {
        Heartbeat {
            host,
            outgoing_interval: (outgoing_rate_ms > 0)
                .then(|| Duration::from_millis(outgoing_rate_ms as u64)),
            // The incoming timer fires at 1.5x the negotiated rate — the
            // error margin allowed before declaring loss.
            incoming_interval: (incoming_rate_ms > 0)
                .then(|| Duration::from_millis(incoming_rate_ms as u64 * 3 / 2)),
            flags: Rc::new(RefCell::new(Flags::default())),
            handles: Rc::new(RefCell::new(Handles::default())),
        }
    }

    /// Arms whichever of the outgoing/incoming timers were negotiated.
    pub fn start(&mut self, scheduler: &mut dyn Scheduler) {
        if let Some(interval) = self.outgoing_interval {
            let flags = self.flags.clone();
            let host = self.host.clone();
            let handle = scheduler.schedule_periodic(
                interval,
                Box::new(move || {
                    let mut flags = flags.borrow_mut();
                    if flags.sent {
                        flags.sent = false;
                    } else {
                        trace!("sending heartbeat byte");
                        host.borrow_mut().send_bytes(b"\n");
                    }
                }),
            );
            self.handles.borrow_mut().outgoing = Some(handle);
        }

        if let Some(interval) = self.incoming_interval {
            let flags = self.flags.clone();
            let host = self.host.clone();
            let handles = self.handles.clone();
            let handle = scheduler.schedule_periodic(
                interval,
                Box::new(move || {
                    let mut received = flags.borrow_mut();
                    if received.received {
                        received.received = false;
                    } else {
                        drop(received);
                        warn!("no data received within heartbeat window, declaring failure");
                        handles.borrow_mut().cancel_all();
                        host.borrow_mut().heartbeat_failed("heartbeat failure");
                    }
                }),
            );
            self.handles.borrow_mut().incoming = Some(handle);
        }
    }

    /// Marks that outbound data was sent since the last outgoing tick.
    pub fn sent_data(&mut self) {
        self.flags.borrow_mut().sent = true;
    }

    /// Marks that inbound data was received since the last incoming tick.
    pub fn received_data(&mut self) {
        self.flags.borrow_mut().received = true;
    }

    /// Cancels both timers. Idempotent.
    pub fn stop(&mut self) {
        self.handles.borrow_mut().cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualScheduler;
    use std::cell::RefCell as StdRefCell;

    #[derive(Default)]
    struct RecordingHost {
        sent: Vec<Vec<u8>>,
        failures: Vec<String>,
    }

    impl HeartbeatHost for RecordingHost {
        fn send_bytes(&mut self, bytes: &[u8]) {
            self.sent.push(bytes.to_vec());
        }
        fn heartbeat_failed(&mut self, message: &str) {
            self.failures.push(message.to_string());
        }
    }

    #[test]
    fn negotiate_applies_max_with_floor() {
        let (incoming, outgoing) = Heartbeat::<RecordingHost>::negotiate("1000,2000", 500, 500).unwrap();
        assert_eq!(incoming, 1000);
        assert_eq!(outgoing, 2000);

        let (incoming, outgoing) = Heartbeat::<RecordingHost>::negotiate("1000,2000", 5000, 5000).unwrap();
        assert_eq!(incoming, 5000);
        assert_eq!(outgoing, 5000);
    }

    #[test]
    fn zero_means_no_heartbeat_in_that_direction() {
        let (incoming, outgoing) = Heartbeat::<RecordingHost>::negotiate("0,0", 5000, 5000).unwrap();
        assert_eq!(incoming, 0);
        assert_eq!(outgoing, 0);
    }

    #[test]
    fn outgoing_tick_sends_byte_only_if_nothing_was_sent() {
        let host = Rc::new(StdRefCell::new(RecordingHost::default()));
        let mut hb = Heartbeat::new(host.clone(), 0, 1000);
        let mut scheduler = ManualScheduler::new();
        hb.start(&mut scheduler);

        scheduler.advance(Duration::from_millis(1000));
        assert_eq!(host.borrow().sent, vec![b"\n".to_vec()]);

        hb.sent_data();
        scheduler.advance(Duration::from_millis(1000));
        assert_eq!(host.borrow().sent.len(), 1, "no heartbeat sent after real data went out");
    }

    #[test]
    fn incoming_loss_reports_failure_and_cancels_both_timers() {
        let host = Rc::new(StdRefCell::new(RecordingHost::default()));
        let mut hb = Heartbeat::new(host.clone(), 5000, 0);
        let mut scheduler = ManualScheduler::new();
        hb.start(&mut scheduler);

        scheduler.advance(Duration::from_millis(7500));
        assert_eq!(host.borrow().failures, vec!["heartbeat failure".to_string()]);
        assert_eq!(scheduler.active_timer_count(), 0);
    }

    #[test]
    fn incoming_data_clears_the_flag_and_avoids_failure() {
        let host = Rc::new(StdRefCell::new(RecordingHost::default()));
        let mut hb = Heartbeat::new(host.clone(), 5000, 0);
        let mut scheduler = ManualScheduler::new();
        hb.start(&mut scheduler);

        hb.received_data();
        scheduler.advance(Duration::from_millis(7500));
        assert!(host.borrow().failures.is_empty());
    }
}
