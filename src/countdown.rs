use crate::{
    event::{
        GridEvent,
        GridEventSender,
    },
    timer::TimerHandle,
};
use std::{
    ops::ControlFlow,
    time::Duration,
};

/// Formats seconds as `h:m:s` without padding, e.g. `3661 -> "1:1:1"`.
pub fn format_hms(secs: u64) -> String {
    format!("{}:{}:{}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Per-tile countdown fed by a server-supplied ttl.
///
/// The ticker task only emits [`GridEvent::CountdownTick`]; the count itself
/// lives here and is advanced by [`Countdown::on_tick`]. Ticks carry the
/// generation they were started with so a tick queued by a cancelled
/// schedule is ignored.
#[derive(Debug)]
pub struct Countdown {
    source_secs: u64,
    remaining: u64,
    generation: u64,
    handle: TimerHandle,
}

impl Countdown {
    pub fn start(
        index: usize,
        secs: u64,
        period: Duration,
        generation: u64,
        events: &GridEventSender,
    ) -> Self {
        let handle = if secs == 0 {
            TimerHandle::idle()
        } else {
            let events = events.clone();
            let mut left = secs;
            TimerHandle::every(period, move || {
                left -= 1;
                let sent = events.send(GridEvent::CountdownTick { index, generation });
                if sent.is_err() || left == 0 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
        };
        Self {
            source_secs: secs,
            remaining: secs,
            generation,
            handle,
        }
    }

    /// The value this countdown was started from.
    pub fn source_secs(&self) -> u64 {
        self.source_secs
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Applies a tick; returns false for ticks from another generation.
    pub fn on_tick(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        true
    }

    pub fn render(&self) -> String {
        format_hms(self.remaining)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_active()
    }

    pub fn cancel(&mut self) {
        self.handle.cancel();
    }
}
