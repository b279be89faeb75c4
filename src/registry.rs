use crate::{
    countdown::Countdown,
    event::GridEventSender,
    model::GlobalViewModel,
    retry::{
        PurchaseOrder,
        RetrySchedule,
        wants_retry,
    },
    tile_state::render_mode,
};
use std::{
    collections::BTreeMap,
    time::Duration,
};

/// Countdown and retry schedules keyed by tile index.
///
/// Every schedule is created and cancelled here. After each reconciliation
/// [`TimerRegistry::sync`] brings the schedules in line with the model.
#[derive(Debug)]
pub struct TimerRegistry {
    tick: Duration,
    retry: Duration,
    events: GridEventSender,
    next_generation: u64,
    countdowns: BTreeMap<usize, Countdown>,
    retries: BTreeMap<usize, RetrySchedule>,
}

impl TimerRegistry {
    pub fn new(tick: Duration, retry: Duration, events: GridEventSender) -> Self {
        Self {
            tick,
            retry,
            events,
            next_generation: 0,
            countdowns: BTreeMap::new(),
            retries: BTreeMap::new(),
        }
    }

    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn sync(&mut self, model: &GlobalViewModel) {
        let len = model.tiles.len();
        let orphans: Vec<usize> = self
            .countdowns
            .keys()
            .chain(self.retries.keys())
            .copied()
            .filter(|index| *index >= len)
            .collect();
        self.teardown(&orphans);

        for tile in &model.tiles {
            let snapshot = tile.view.authoritative();
            let mode = render_mode(snapshot, tile.view.draft_message());
            match mode.countdown_secs() {
                Some(secs) => self.ensure_countdown(tile.index, secs),
                None => self.stop_countdown(tile.index),
            }
            if wants_retry(&tile.view) {
                if !self.retries.contains_key(&tile.index) {
                    self.arm_retry(tile.index);
                }
            } else {
                self.disarm_retry(tile.index);
            }
        }
    }

    /// Starts a countdown unless one is already running from the same input.
    pub fn ensure_countdown(&mut self, index: usize, secs: u64) {
        if self
            .countdowns
            .get(&index)
            .is_some_and(|countdown| countdown.source_secs() == secs)
        {
            return;
        }
        self.stop_countdown(index);
        let generation = self.generation();
        let countdown = Countdown::start(index, secs, self.tick, generation, &self.events);
        self.countdowns.insert(index, countdown);
    }

    pub fn stop_countdown(&mut self, index: usize) {
        if let Some(mut countdown) = self.countdowns.remove(&index) {
            countdown.cancel();
        }
    }

    pub fn on_countdown_tick(&mut self, index: usize, generation: u64) -> bool {
        self.countdowns
            .get_mut(&index)
            .is_some_and(|countdown| countdown.on_tick(generation))
    }

    /// Arms a fresh purchase cycle, cancelling any existing one first.
    pub fn arm_retry(&mut self, index: usize) -> u64 {
        self.disarm_retry(index);
        let generation = self.generation();
        let schedule = RetrySchedule::arm(index, self.retry, generation, &self.events);
        self.retries.insert(index, schedule);
        tracing::debug!(index, generation, "armed purchase retry");
        generation
    }

    pub fn disarm_retry(&mut self, index: usize) {
        if let Some(mut schedule) = self.retries.remove(&index) {
            schedule.cancel();
            tracing::debug!(index, "disarmed purchase retry");
        }
    }

    /// Evaluates a retry tick; stale ticks are ignored.
    pub fn on_retry_tick(
        &mut self,
        index: usize,
        generation: u64,
        model: &GlobalViewModel,
    ) -> Option<PurchaseOrder> {
        let schedule = self.retries.get_mut(&index)?;
        if schedule.generation() != generation {
            return None;
        }
        let view = &model.tiles.get(index)?.view;
        schedule.evaluate(index, view, model.balance, model.price)
    }

    /// Evaluates the purchase condition right away, outside the cadence.
    pub fn purchase_now(
        &mut self,
        index: usize,
        model: &GlobalViewModel,
    ) -> Option<PurchaseOrder> {
        let schedule = self.retries.get_mut(&index)?;
        let view = &model.tiles.get(index)?.view;
        schedule.evaluate(index, view, model.balance, model.price)
    }

    pub fn on_purchase_finished(
        &mut self,
        index: usize,
        generation: u64,
        succeeded: bool,
    ) -> bool {
        self.retries
            .get_mut(&index)
            .is_some_and(|schedule| schedule.complete(generation, succeeded))
    }

    pub fn teardown(&mut self, indices: &[usize]) {
        for index in indices {
            self.stop_countdown(*index);
            self.disarm_retry(*index);
        }
    }

    pub fn shutdown(&mut self) {
        for countdown in self.countdowns.values_mut() {
            countdown.cancel();
        }
        for schedule in self.retries.values_mut() {
            schedule.cancel();
        }
        self.countdowns.clear();
        self.retries.clear();
    }

    pub fn countdown(&self, index: usize) -> Option<&Countdown> {
        self.countdowns.get(&index)
    }

    pub fn retry(&self, index: usize) -> Option<&RetrySchedule> {
        self.retries.get(&index)
    }

    pub fn countdown_indices(&self) -> Vec<usize> {
        self.countdowns.keys().copied().collect()
    }

    pub fn retry_indices(&self) -> Vec<usize> {
        self.retries.keys().copied().collect()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
