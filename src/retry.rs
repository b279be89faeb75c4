use crate::{
    event::{
        GridEvent,
        GridEventSender,
    },
    model::{
        TileState,
        TileView,
    },
    tile_state::funds_sufficient,
    timer::TimerHandle,
};
use std::{
    ops::ControlFlow,
    time::Duration,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurchasePhase {
    Idle,
    InFlight,
    Sent,
}

/// A purchase the controller should send now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchaseOrder {
    pub index: usize,
    pub generation: u64,
    pub message: String,
}

/// Whether a tile should have an armed purchase schedule.
pub fn wants_retry(view: &TileView) -> bool {
    view.state() == TileState::LockedByCurrentUser && !view.draft_message().is_empty()
}

/// One armed purchase cycle for one tile.
///
/// Within a cycle at most one purchase succeeds in being sent; a failed
/// request returns the cycle to `Idle` so the next tick may try again.
#[derive(Debug)]
pub struct RetrySchedule {
    generation: u64,
    phase: PurchasePhase,
    handle: TimerHandle,
}

impl RetrySchedule {
    pub fn arm(
        index: usize,
        period: Duration,
        generation: u64,
        events: &GridEventSender,
    ) -> Self {
        let events = events.clone();
        let handle = TimerHandle::every(period, move || {
            match events.send(GridEvent::RetryTick { index, generation }) {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => ControlFlow::Break(()),
            }
        });
        Self {
            generation,
            phase: PurchasePhase::Idle,
            handle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> PurchasePhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    pub fn cancel(&mut self) {
        self.handle.cancel();
    }

    /// Evaluates the purchase condition for this cycle. Returns an order and
    /// moves to `InFlight` when the tile still qualifies, nothing is pending,
    /// and `balance >= price`.
    pub fn evaluate(
        &mut self,
        index: usize,
        view: &TileView,
        balance: Option<f64>,
        price: Option<f64>,
    ) -> Option<PurchaseOrder> {
        if self.phase != PurchasePhase::Idle || !wants_retry(view) {
            return None;
        }
        if !funds_sufficient(balance, price) {
            tracing::trace!(index, ?balance, ?price, "purchase threshold not met");
            return None;
        }
        self.phase = PurchasePhase::InFlight;
        Some(PurchaseOrder {
            index,
            generation: self.generation,
            message: view.draft_message().to_string(),
        })
    }

    /// Records the outcome of a request sent for this cycle; results from
    /// other generations are ignored.
    pub fn complete(&mut self, generation: u64, succeeded: bool) -> bool {
        if generation != self.generation || self.phase != PurchasePhase::InFlight {
            return false;
        }
        self.phase = if succeeded {
            PurchasePhase::Sent
        } else {
            PurchasePhase::Idle
        };
        true
    }
}
