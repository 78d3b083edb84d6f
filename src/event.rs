use std::sync::mpsc::{channel, Receiver, Sender};

use gnss_rs::sv::SV;

use crate::types::Fix;

/// What went wrong in an SV-local stage; reported, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelErrorKind {
    AcquisitionFailed,
    LockLost,
    ParityFailure,
    EphemerisInconsistent,
}

/// Everything observable about the receiver, in one sum type. The
/// dashboard (or the CLI) is a single subscriber on the channel end.
#[derive(Debug, Clone)]
pub enum Event {
    Acquired {
        sv: SV,
        doppler_hz: f64,
        code_phase: usize,
        peak_ratio: f64,
    },
    Locked {
        sv: SV,
        cn0: f64,
    },
    Unlocked {
        sv: SV,
    },
    BitSync {
        sv: SV,
        phase: usize,
    },
    FrameSync {
        sv: SV,
        inverted: bool,
    },
    Subframe {
        sv: SV,
        id: u32,
        tow_sec: f64,
    },
    EphemerisReady {
        sv: SV,
        iode: u32,
    },
    Fix(Fix),
    Overrun {
        dropped: u64,
    },
    ChannelError {
        sv: SV,
        kind: ChannelErrorKind,
    },
}

/// A timestamped event as delivered to the subscriber.
#[derive(Debug, Clone)]
pub struct TimedEvent {
    pub ts_sec: f64,
    pub event: Event,
}

pub fn event_channel() -> (EventSink, Receiver<TimedEvent>) {
    let (tx, rx) = channel();
    (EventSink { tx }, rx)
}

/// Producer half. Sends are infallible from the pipeline's point of view:
/// a hung-up subscriber must not stall tracking.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<TimedEvent>,
}

impl EventSink {
    pub fn publish(&self, ts_sec: f64, event: Event) {
        let _ = self.tx.send(TimedEvent { ts_sec, event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnss_rs::constellation::Constellation;

    #[test]
    fn events_arrive_in_publish_order() {
        let (sink, rx) = event_channel();
        let sv = SV::new(Constellation::GPS, 7);
        sink.publish(0.1, Event::BitSync { sv, phase: 3 });
        sink.publish(0.2, Event::FrameSync { sv, inverted: true });
        drop(sink);

        let evs: Vec<TimedEvent> = rx.iter().collect();
        assert_eq!(evs.len(), 2);
        assert!(matches!(evs[0].event, Event::BitSync { phase: 3, .. }));
        assert!(matches!(evs[1].event, Event::FrameSync { inverted: true, .. }));
    }

    #[test]
    fn publish_without_subscriber_does_not_panic() {
        let (sink, rx) = event_channel();
        drop(rx);
        sink.publish(0.0, Event::Overrun { dropped: 42 });
    }
}
