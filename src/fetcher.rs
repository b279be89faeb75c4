use crate::{
    event::{
        GridEvent,
        GridEventSender,
    },
    model::{
        RefreshTicket,
        Snapshot,
    },
    tile_client::TileApi,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::time::Duration;
use tokio::{
    sync::mpsc,
    time::{
        self,
        Instant,
        MissedTickBehavior,
    },
};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchCommand {
    /// Refresh out of band; the resulting snapshot carries at least `ticket`.
    FetchNow(RefreshTicket),
    Shutdown,
}

pub type FetchCommandSender = mpsc::UnboundedSender<FetchCommand>;

/// Issues the combined addresses/tiles/price fetch.
pub struct RemoteStateFetcher<A> {
    api: A,
    price: Option<f64>,
}

impl<A: TileApi> RemoteStateFetcher<A> {
    pub fn new(api: A) -> Self {
        Self { api, price: None }
    }

    pub fn known_price(&self) -> Option<f64> {
        self.price
    }

    /// One fetch cycle. Addresses and tiles must both arrive or the cycle
    /// fails as a whole. The price is only requested until it is known once,
    /// and a price failure does not fail the cycle.
    pub async fn fetch(&mut self, ticket: RefreshTicket) -> Result<Snapshot> {
        let (addresses, tiles) = futures::try_join!(self.api.addresses(), self.api.tiles())
            .wrap_err("fetching addresses and tiles failed")?;
        let fresh_price = if self.price.is_none() {
            match self.api.price().await {
                Ok(price) => {
                    tracing::info!(price, "fetched tile price");
                    self.price = Some(price);
                    Some(price)
                }
                Err(err) => {
                    warn!(?err, "price fetch failed; will retry next cycle");
                    None
                }
            }
        } else {
            None
        };
        Ok(Snapshot::new(addresses, tiles, fresh_price, ticket))
    }

    /// Worker loop: fetch once immediately, then on every `refresh` tick and
    /// on every `FetchNow`. Fetches run one at a time; `FetchNow` commands
    /// and ticks that pile up during a fetch are merged into the next one.
    pub async fn run(
        mut self,
        refresh: Duration,
        mut cmd_rx: mpsc::UnboundedReceiver<FetchCommand>,
        events: GridEventSender,
    ) -> Result<()> {
        let mut ticket = RefreshTicket::default();
        let refresh = refresh.max(Duration::from_millis(1));
        let mut ticker = time::interval_at(Instant::now() + refresh, refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if !self.cycle(ticket, &events).await {
            return Ok(());
        }
        ticker.reset();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(FetchCommand::FetchNow(requested)) => {
                            ticket = ticket.max(requested);
                        }
                        Some(FetchCommand::Shutdown) | None => break,
                    }
                }
            }
            let mut shutdown = false;
            while let Ok(cmd) = cmd_rx.try_recv() {
                match cmd {
                    FetchCommand::FetchNow(requested) => ticket = ticket.max(requested),
                    FetchCommand::Shutdown => shutdown = true,
                }
            }
            if shutdown || !self.cycle(ticket, &events).await {
                break;
            }
            ticker.reset();
        }
        tracing::info!("fetch worker stopped");
        Ok(())
    }

    /// Returns false once nobody listens for snapshots any more.
    async fn cycle(&mut self, ticket: RefreshTicket, events: &GridEventSender) -> bool {
        match self.fetch(ticket).await {
            Ok(snapshot) => events.send(GridEvent::Snapshot(snapshot)).is_ok(),
            Err(err) => {
                warn!(?err, "snapshot fetch failed");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        model::{
            Address,
            TileSnapshot,
            TileState,
        },
        test_helpers::FakeTileApi,
        tile_client::{
            LockAck,
            PurchaseAck,
        },
    };
    use std::{
        future::Future,
        sync::{
            Arc,
            atomic::{
                AtomicBool,
                AtomicUsize,
                Ordering::SeqCst,
            },
        },
    };
    use tokio::sync::Notify;

    /// Holds every `tiles` request until the gate opens.
    #[derive(Clone, Default)]
    struct GatedTileApi {
        inner: FakeTileApi,
        gate: Arc<Notify>,
        closed: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        most_in_flight: Arc<AtomicUsize>,
    }

    impl GatedTileApi {
        fn closed(inner: FakeTileApi) -> Self {
            let api = Self {
                inner,
                ..Self::default()
            };
            api.closed.store(true, SeqCst);
            api
        }

        fn open(&self) {
            self.closed.store(false, SeqCst);
            self.gate.notify_one();
        }
    }

    impl TileApi for GatedTileApi {
        fn addresses(&self) -> impl Future<Output = Result<Vec<Address>>> + Send {
            self.inner.addresses()
        }

        fn tiles(&self) -> impl Future<Output = Result<Vec<TileSnapshot>>> + Send {
            async move {
                self.calls.fetch_add(1, SeqCst);
                let now = self.in_flight.fetch_add(1, SeqCst) + 1;
                self.most_in_flight.fetch_max(now, SeqCst);
                if self.closed.load(SeqCst) {
                    self.gate.notified().await;
                }
                self.in_flight.fetch_sub(1, SeqCst);
                self.inner.tiles().await
            }
        }

        fn price(&self) -> impl Future<Output = Result<f64>> + Send {
            self.inner.price()
        }

        fn lock_tile(&self, frame_number: usize) -> impl Future<Output = Result<LockAck>> + Send {
            self.inner.lock_tile(frame_number)
        }

        fn purchase(
            &self,
            frame_number: usize,
            message: String,
        ) -> impl Future<Output = Result<PurchaseAck>> + Send {
            self.inner.purchase(frame_number, message)
        }
    }

    async fn yield_a_while() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn fetch__combines_addresses_tiles_and_price() {
        // given
        let api = FakeTileApi::with_grid(3, 5.0);
        api.set_balance(0, 2.5);
        let mut fetcher = RemoteStateFetcher::new(api.clone());

        // when
        let snapshot = fetcher.fetch(RefreshTicket(4)).await.unwrap();

        // then
        assert_eq!(snapshot.addresses.len(), 3);
        assert_eq!(snapshot.tiles.len(), 3);
        assert_eq!(snapshot.balance, Some(2.5));
        assert_eq!(snapshot.price, Some(5.0));
        assert_eq!(snapshot.ticket, RefreshTicket(4));
    }

    #[tokio::test]
    async fn fetch__requests_price_only_until_known() {
        // given
        let api = FakeTileApi::with_grid(1, 5.0);
        let mut fetcher = RemoteStateFetcher::new(api.clone());

        // when
        let first = fetcher.fetch(RefreshTicket(0)).await.unwrap();
        let second = fetcher.fetch(RefreshTicket(0)).await.unwrap();

        // then
        assert_eq!(first.price, Some(5.0));
        assert_eq!(second.price, None);
        assert_eq!(api.price_requests(), 1);
    }

    #[tokio::test]
    async fn fetch__price_failure_keeps_the_cycle() {
        // given
        let api = FakeTileApi::with_grid(2, 5.0);
        api.fail_price(true);
        let mut fetcher = RemoteStateFetcher::new(api.clone());

        // when
        let snapshot = fetcher.fetch(RefreshTicket(0)).await.unwrap();
        api.fail_price(false);
        let retried = fetcher.fetch(RefreshTicket(0)).await.unwrap();

        // then
        assert_eq!(snapshot.price, None);
        assert_eq!(snapshot.tiles.len(), 2);
        assert_eq!(retried.price, Some(5.0));
        assert_eq!(fetcher.known_price(), Some(5.0));
    }

    #[tokio::test]
    async fn fetch__tile_failure_fails_the_cycle() {
        // given
        let api = FakeTileApi::with_grid(2, 5.0);
        api.fail_fetches(true);
        let mut fetcher = RemoteStateFetcher::new(api);

        // then
        assert!(fetcher.fetch(RefreshTicket(0)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn run__fetches_at_start_then_on_cadence() {
        // given
        let api = FakeTileApi::with_grid(1, 5.0);
        api.set_tile(
            0,
            TileSnapshot {
                state: TileState::LockedByOther,
                ttl: 30,
                message: String::new(),
            },
        );
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(RemoteStateFetcher::new(api.clone()).run(
            Duration::from_millis(3_000),
            cmd_rx,
            event_tx,
        ));

        // when
        let first = event_rx.recv().await;
        time::advance(Duration::from_millis(2_999)).await;
        let early = event_rx.try_recv().is_ok();
        let second = event_rx.recv().await;

        // then
        assert!(matches!(first, Some(GridEvent::Snapshot(_))));
        assert!(!early);
        assert!(matches!(second, Some(GridEvent::Snapshot(_))));
        assert_eq!(api.tile_requests(), 2);

        cmd_tx.send(FetchCommand::Shutdown).unwrap();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run__fetch_now_carries_ticket() {
        // given
        let api = FakeTileApi::with_grid(1, 5.0);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(RemoteStateFetcher::new(api).run(
            Duration::from_secs(60),
            cmd_rx,
            event_tx,
        ));
        let _startup = event_rx.recv().await;

        // when
        cmd_tx.send(FetchCommand::FetchNow(RefreshTicket(3))).unwrap();
        cmd_tx.send(FetchCommand::FetchNow(RefreshTicket(5))).unwrap();
        let refreshed = event_rx.recv().await;

        // then
        let Some(GridEvent::Snapshot(snapshot)) = refreshed else {
            panic!("expected a snapshot");
        };
        assert_eq!(snapshot.ticket, RefreshTicket(5));

        cmd_tx.send(FetchCommand::Shutdown).unwrap();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run__stalled_fetch_merges_pending_ticks_and_commands() {
        // given
        let api = GatedTileApi::closed(FakeTileApi::with_grid(1, 5.0));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(RemoteStateFetcher::new(api.clone()).run(
            Duration::from_secs(3),
            cmd_rx,
            event_tx,
        ));
        yield_a_while().await;

        // when
        cmd_tx.send(FetchCommand::FetchNow(RefreshTicket(7))).unwrap();
        time::advance(Duration::from_secs(7)).await;
        yield_a_while().await;
        let calls_while_stalled = api.calls.load(SeqCst);
        api.open();
        let startup = event_rx.recv().await;
        let follow_up = event_rx.recv().await;
        yield_a_while().await;

        // then
        assert_eq!(calls_while_stalled, 1);
        assert_eq!(api.most_in_flight.load(SeqCst), 1);
        let Some(GridEvent::Snapshot(startup)) = startup else {
            panic!("expected the startup snapshot");
        };
        let Some(GridEvent::Snapshot(follow_up)) = follow_up else {
            panic!("expected a follow-up snapshot");
        };
        assert_eq!(startup.ticket, RefreshTicket(0));
        assert_eq!(follow_up.ticket, RefreshTicket(7));
        assert!(event_rx.try_recv().is_err());
        assert_eq!(api.calls.load(SeqCst), 2);

        cmd_tx.send(FetchCommand::Shutdown).unwrap();
        worker.await.unwrap().unwrap();
    }
}
