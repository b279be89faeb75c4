use crate::{
    model::Snapshot,
    tile_client::{
        LockAck,
        PurchaseAck,
    },
};
use color_eyre::eyre::Result;

/// Everything that can wake the controller loop. Timers and requests run as
/// separate tasks and only report back through these events; all state
/// changes happen where they are handled.
#[derive(Debug)]
pub enum GridEvent {
    Snapshot(Snapshot),
    CountdownTick {
        index: usize,
        generation: u64,
    },
    RetryTick {
        index: usize,
        generation: u64,
    },
    LockFinished {
        index: usize,
        message: String,
        outcome: Result<LockAck>,
    },
    PurchaseFinished {
        index: usize,
        generation: u64,
        outcome: Result<PurchaseAck>,
    },
}

pub type GridEventSender = tokio::sync::mpsc::UnboundedSender<GridEvent>;
pub type GridEventReceiver = tokio::sync::mpsc::UnboundedReceiver<GridEvent>;
