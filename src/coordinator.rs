use crate::{
    event::{
        GridEvent,
        GridEventSender,
    },
    retry::PurchaseOrder,
    tile_client::TileApi,
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use std::collections::BTreeSet;

/// Sends lock requests, at most one in flight per tile.
///
/// The acknowledgement comes back as [`GridEvent::LockFinished`]; the
/// controller then records the draft and forces a refresh. Nothing here
/// touches the authoritative tile state.
#[derive(Debug)]
pub struct LockRequestCoordinator<A> {
    api: A,
    events: GridEventSender,
    in_flight: BTreeSet<usize>,
}

impl<A: TileApi> LockRequestCoordinator<A> {
    pub fn new(api: A, events: GridEventSender) -> Self {
        Self {
            api,
            events,
            in_flight: BTreeSet::new(),
        }
    }

    pub fn request_lock(&mut self, index: usize, message: String) -> Result<()> {
        if message.is_empty() {
            return Err(eyre!("cannot lock tile {index} with an empty message"));
        }
        if !self.in_flight.insert(index) {
            return Err(eyre!("a lock request for tile {index} is already pending"));
        }
        tracing::info!(index, "requesting tile lock");
        let api = self.api.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = api.lock_tile(index).await;
            let _ = events.send(GridEvent::LockFinished {
                index,
                message,
                outcome,
            });
        });
        Ok(())
    }

    pub fn finish(&mut self, index: usize) {
        self.in_flight.remove(&index);
    }

    pub fn is_pending(&self, index: usize) -> bool {
        self.in_flight.contains(&index)
    }
}

/// Sends the purchase for an order produced by the retry schedule.
pub fn dispatch_purchase<A: TileApi>(api: &A, order: PurchaseOrder, events: &GridEventSender) {
    let PurchaseOrder {
        index,
        generation,
        message,
    } = order;
    tracing::info!(index, generation, "sending tile purchase");
    let api = api.clone();
    let events = events.clone();
    tokio::spawn(async move {
        let outcome = api.purchase(index, message).await;
        let _ = events.send(GridEvent::PurchaseFinished {
            index,
            generation,
            outcome,
        });
    });
}
