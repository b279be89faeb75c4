//! In-memory stand-in for the tile server, plus helpers for driving a
//! [`GridController`] under paused tokio time.

use crate::{
    client::GridController,
    event::GridEventReceiver,
    model::{
        Address,
        TileSnapshot,
        TileState,
    },
    tile_client::{
        LockAck,
        PurchaseAck,
        TileApi,
    },
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
};

pub const FAKE_LOCK_TTL: i64 = 300;
pub const FAKE_PURCHASE_TTL: i64 = 300;

#[derive(Debug, Default)]
struct FakeServerState {
    addresses: Vec<Address>,
    tiles: Vec<TileSnapshot>,
    price: f64,
    lock_ttl: i64,
    fail_fetches: bool,
    fail_price: bool,
    reject_locks: bool,
    reject_purchases: bool,
    lock_requests: Vec<usize>,
    purchases: Vec<(usize, String)>,
    tile_requests: usize,
    price_requests: usize,
}

/// Fake server that behaves like the real one: locking an open tile hands it
/// to the caller, purchasing a held tile with enough balance marks it
/// purchased.
#[derive(Clone, Debug, Default)]
pub struct FakeTileApi {
    state: Arc<Mutex<FakeServerState>>,
}

impl FakeTileApi {
    pub fn with_grid(tiles: usize, price: f64) -> Self {
        let state = FakeServerState {
            addresses: (0..tiles)
                .map(|i| Address {
                    address: format!("1FakeAddress{i:04}"),
                    balance: 0.0,
                })
                .collect(),
            tiles: vec![TileSnapshot::open(); tiles],
            price,
            lock_ttl: FAKE_LOCK_TTL,
            ..FakeServerState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_balance(&self, index: usize, balance: f64) {
        if let Some(address) = self.state().addresses.get_mut(index) {
            address.balance = balance;
        }
    }

    pub fn set_tile(&self, index: usize, tile: TileSnapshot) {
        if let Some(slot) = self.state().tiles.get_mut(index) {
            *slot = tile;
        }
    }

    /// Ttl handed out with the next successful lock.
    pub fn set_lock_ttl(&self, ttl: i64) {
        self.state().lock_ttl = ttl;
    }

    pub fn tile(&self, index: usize) -> Option<TileSnapshot> {
        self.state().tiles.get(index).cloned()
    }

    /// Shrinks or grows the grid, keeping addresses and tiles aligned.
    pub fn resize(&self, tiles: usize) {
        let mut state = self.state();
        state.tiles.resize(tiles, TileSnapshot::open());
        let existing = state.addresses.len();
        state.addresses.truncate(tiles);
        for i in existing..tiles {
            state.addresses.push(Address {
                address: format!("1FakeAddress{i:04}"),
                balance: 0.0,
            });
        }
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.state().fail_fetches = fail;
    }

    pub fn fail_price(&self, fail: bool) {
        self.state().fail_price = fail;
    }

    pub fn reject_locks(&self, reject: bool) {
        self.state().reject_locks = reject;
    }

    pub fn reject_purchases(&self, reject: bool) {
        self.state().reject_purchases = reject;
    }

    pub fn lock_requests(&self) -> Vec<usize> {
        self.state().lock_requests.clone()
    }

    pub fn purchases(&self) -> Vec<(usize, String)> {
        self.state().purchases.clone()
    }

    pub fn tile_requests(&self) -> usize {
        self.state().tile_requests
    }

    pub fn price_requests(&self) -> usize {
        self.state().price_requests
    }
}

impl TileApi for FakeTileApi {
    async fn addresses(&self) -> Result<Vec<Address>> {
        let state = self.state();
        if state.fail_fetches {
            return Err(eyre!("fake server unavailable"));
        }
        Ok(state.addresses.clone())
    }

    async fn tiles(&self) -> Result<Vec<TileSnapshot>> {
        let mut state = self.state();
        state.tile_requests += 1;
        if state.fail_fetches {
            return Err(eyre!("fake server unavailable"));
        }
        Ok(state.tiles.clone())
    }

    async fn price(&self) -> Result<f64> {
        let mut state = self.state();
        state.price_requests += 1;
        if state.fail_price {
            return Err(eyre!("fake price unavailable"));
        }
        Ok(state.price)
    }

    async fn lock_tile(&self, frame_number: usize) -> Result<LockAck> {
        let mut state = self.state();
        state.lock_requests.push(frame_number);
        if state.reject_locks {
            return Err(eyre!("fake lock rejected"));
        }
        let ttl = state.lock_ttl;
        let tile = state
            .tiles
            .get_mut(frame_number)
            .ok_or_else(|| eyre!("This tile is not available"))?;
        if tile.state == TileState::Open {
            *tile = TileSnapshot {
                state: TileState::LockedByCurrentUser,
                ttl,
                message: String::new(),
            };
        }
        let state = serde_json::to_value(tile.state)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string));
        Ok(LockAck { state })
    }

    async fn purchase(&self, frame_number: usize, message: String) -> Result<PurchaseAck> {
        let mut state = self.state();
        state.purchases.push((frame_number, message.clone()));
        if state.reject_purchases {
            return Err(eyre!("fake purchase rejected"));
        }
        let price = state.price;
        let balance = state
            .addresses
            .get(frame_number)
            .map(|address| address.balance)
            .unwrap_or_default();
        if balance < price {
            return Err(eyre!("funds are insufficient"));
        }
        let tile = state
            .tiles
            .get_mut(frame_number)
            .ok_or_else(|| eyre!("This tile is not available"))?;
        if tile.state != TileState::LockedByCurrentUser {
            return Err(eyre!("tile is not locked by current user"));
        }
        *tile = TileSnapshot {
            state: TileState::Purchased,
            ttl: FAKE_PURCHASE_TTL,
            message,
        };
        Ok(PurchaseAck {
            transaction_id: Some(format!("fake-tx-{frame_number}")),
        })
    }
}

/// Lets spawned tasks run and feeds every event they emit into the
/// controller until the queue stays empty.
pub async fn settle<A: TileApi>(
    controller: &mut GridController<A>,
    events: &mut GridEventReceiver,
) -> usize {
    let mut handled = 0;
    loop {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        let mut handled_this_round = 0;
        while let Ok(event) = events.try_recv() {
            controller.handle_event(event);
            handled_this_round += 1;
        }
        if handled_this_round == 0 {
            return handled;
        }
        handled += handled_this_round;
    }
}

/// Advances paused time in `step` increments, settling after each one.
pub async fn advance_and_settle<A: TileApi>(
    controller: &mut GridController<A>,
    events: &mut GridEventReceiver,
    total: std::time::Duration,
    step: std::time::Duration,
) {
    let mut elapsed = std::time::Duration::ZERO;
    while elapsed < total {
        let next = step.min(total - elapsed);
        tokio::time::advance(next).await;
        elapsed += next;
        settle(controller, events).await;
    }
}
