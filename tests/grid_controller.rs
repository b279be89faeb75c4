#![allow(non_snake_case)]
use std::time::Duration;
use tile_market::{
    client::GridController,
    config::GridConfig,
    event::GridEventReceiver,
    model::{
        TileSnapshot,
        TileState,
    },
    retry::PurchasePhase,
    test_helpers::{
        FakeTileApi,
        advance_and_settle,
        settle,
    },
    tile_state::{
        PurchaseAffordance,
        TileMode,
    },
};

const SECOND: Duration = Duration::from_secs(1);

async fn started(api: &FakeTileApi) -> (GridController<FakeTileApi>, GridEventReceiver) {
    let (mut controller, mut events) = GridController::start(api.clone(), GridConfig::default());
    settle(&mut controller, &mut events).await;
    (controller, events)
}

async fn locked(
    controller: &mut GridController<FakeTileApi>,
    events: &mut GridEventReceiver,
    index: usize,
    message: &str,
) {
    controller.request_lock(index, message).unwrap();
    settle(controller, events).await;
}

#[tokio::test(start_paused = true)]
async fn start__loads_the_grid() {
    // given
    let api = FakeTileApi::with_grid(3, 5.0);
    api.set_balance(0, 1.5);

    // when
    let (controller, _events) = started(&api).await;

    // then
    let view = controller.view();
    assert_eq!(view.tiles.len(), 3);
    assert_eq!(view.balance, Some(1.5));
    assert_eq!(view.price, Some(5.0));
    assert_eq!(view.status, "3 tiles loaded");
    assert!(
        view.tiles
            .iter()
            .all(|tile| tile.mode == TileMode::Editable { lock_enabled: false })
    );
}

#[tokio::test(start_paused = true)]
async fn request_lock__next_reconciliation_shows_payment_view() {
    // given
    let api = FakeTileApi::with_grid(3, 5.0);
    api.set_lock_ttl(120);
    let (mut controller, mut events) = started(&api).await;

    // when
    locked(&mut controller, &mut events, 1, "hello").await;

    // then
    let view = controller.view();
    let tile = &view.tiles[1];
    assert_eq!(tile.state, TileState::LockedByCurrentUser);
    assert_eq!(tile.mode, TileMode::Payment { countdown_secs: 120 });
    assert_eq!(tile.countdown.as_deref(), Some("0:2:0"));
    assert_eq!(tile.draft, "hello");
    assert!(
        tile.qr_url
            .as_deref()
            .is_some_and(|url| url.contains("chl=1FakeAddress0001"))
    );
    assert_eq!(tile.affordance, Some(PurchaseAffordance::InsufficientFunds));
    assert_eq!(api.lock_requests(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn countdown__ticks_down_and_survives_polls_with_same_ttl() {
    // given
    let api = FakeTileApi::with_grid(1, 5.0);
    api.set_lock_ttl(120);
    let (mut controller, mut events) = started(&api).await;
    locked(&mut controller, &mut events, 0, "hello").await;

    // when
    advance_and_settle(&mut controller, &mut events, 4 * SECOND, SECOND).await;

    // then
    assert_eq!(controller.view().tiles[0].countdown.as_deref(), Some("0:1:56"));
}

#[tokio::test(start_paused = true)]
async fn countdown__restarts_when_server_ttl_changes() {
    // given
    let api = FakeTileApi::with_grid(1, 5.0);
    api.set_tile(
        0,
        TileSnapshot {
            state: TileState::LockedByOther,
            ttl: 3661,
            message: String::new(),
        },
    );
    let (mut controller, mut events) = started(&api).await;
    assert_eq!(controller.view().tiles[0].countdown.as_deref(), Some("1:1:1"));

    // when
    api.set_tile(
        0,
        TileSnapshot {
            state: TileState::LockedByOther,
            ttl: 59,
            message: String::new(),
        },
    );
    advance_and_settle(&mut controller, &mut events, 3 * SECOND, SECOND).await;

    // then
    assert_eq!(controller.view().tiles[0].countdown.as_deref(), Some("0:0:59"));
}

#[tokio::test(start_paused = true)]
async fn retry__waits_for_balance_before_purchasing() {
    // given
    let api = FakeTileApi::with_grid(2, 5.0);
    let (mut controller, mut events) = started(&api).await;
    locked(&mut controller, &mut events, 0, "hello").await;

    // when
    advance_and_settle(&mut controller, &mut events, 10 * SECOND, SECOND).await;
    let purchases_while_broke = api.purchases();
    api.set_balance(0, 5.0);
    advance_and_settle(&mut controller, &mut events, 6 * SECOND, SECOND).await;

    // then
    assert!(purchases_while_broke.is_empty());
    assert_eq!(api.purchases(), vec![(0, "hello".to_string())]);
    let view = controller.view();
    let tile = &view.tiles[0];
    assert_eq!(tile.state, TileState::Purchased);
    assert!(matches!(&tile.mode, TileMode::Purchased { message, .. } if message == "hello"));
    assert_eq!(tile.draft, "");
    assert!(controller.timers().retry(0).is_none());
}

#[tokio::test(start_paused = true)]
async fn retry__rejected_purchase_is_tried_again_on_next_tick() {
    // given
    let api = FakeTileApi::with_grid(1, 5.0);
    api.set_balance(0, 10.0);
    api.reject_purchases(true);
    let (mut controller, mut events) = started(&api).await;
    locked(&mut controller, &mut events, 0, "hello").await;

    // when
    advance_and_settle(&mut controller, &mut events, 4 * SECOND, SECOND).await;
    let rejected = api.purchases().len();
    api.reject_purchases(false);
    advance_and_settle(&mut controller, &mut events, 2 * SECOND, SECOND).await;

    // then
    assert_eq!(rejected, 2);
    assert_eq!(api.purchases().len(), 3);
    assert_eq!(api.tile(0).unwrap().state, TileState::Purchased);
    assert!(!controller.view().errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn purchase_now__sends_once_per_armed_cycle() {
    // given
    let api = FakeTileApi::with_grid(1, 5.0);
    api.set_balance(0, 10.0);
    let (mut controller, mut events) = started(&api).await;
    locked(&mut controller, &mut events, 0, "hello").await;

    // when
    let first = controller.purchase_now(0);
    let second = controller.purchase_now(0);
    settle(&mut controller, &mut events).await;

    // then
    assert!(first.is_ok());
    assert!(second.is_err());
    assert_eq!(api.purchases().len(), 1);
    assert_eq!(controller.view().tiles[0].state, TileState::Purchased);
}

#[tokio::test(start_paused = true)]
async fn purchase_now__refuses_without_funds() {
    // given
    let api = FakeTileApi::with_grid(1, 5.0);
    let (mut controller, mut events) = started(&api).await;
    locked(&mut controller, &mut events, 0, "hello").await;

    // when
    let result = controller.purchase_now(0);
    settle(&mut controller, &mut events).await;

    // then
    assert!(result.is_err());
    assert!(api.purchases().is_empty());
    assert_eq!(
        controller.timers().retry(0).map(|retry| retry.phase()),
        Some(PurchasePhase::Idle)
    );
}

#[tokio::test(start_paused = true)]
async fn edit_draft__clearing_the_message_disarms_retry() {
    // given
    let api = FakeTileApi::with_grid(1, 5.0);
    let (mut controller, mut events) = started(&api).await;
    locked(&mut controller, &mut events, 0, "hello").await;
    assert!(controller.timers().retry(0).is_some());

    // when
    controller.edit_draft(0, "").unwrap();

    // then
    assert!(controller.timers().retry(0).is_none());
    assert_eq!(
        controller.view().tiles[0].mode,
        TileMode::Editable {
            lock_enabled: false
        }
    );
}

#[tokio::test(start_paused = true)]
async fn edit_draft__changes_message_sent_on_purchase() {
    // given
    let api = FakeTileApi::with_grid(1, 5.0);
    let (mut controller, mut events) = started(&api).await;
    locked(&mut controller, &mut events, 0, "hello").await;

    // when
    controller.edit_draft(0, "gm").unwrap();
    api.set_balance(0, 5.0);
    advance_and_settle(&mut controller, &mut events, 6 * SECOND, SECOND).await;

    // then
    assert_eq!(api.purchases(), vec![(0, "gm".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn request_lock__rejection_leaves_tile_open() {
    // given
    let api = FakeTileApi::with_grid(1, 5.0);
    api.reject_locks(true);
    let (mut controller, mut events) = started(&api).await;

    // when
    locked(&mut controller, &mut events, 0, "hello").await;

    // then
    let view = controller.view();
    assert_eq!(view.tiles[0].state, TileState::Open);
    assert_eq!(view.tiles[0].draft, "");
    assert!(!view.tiles[0].lock_pending);
    assert_eq!(view.errors.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn request_lock__lost_race_clears_the_draft() {
    // given
    let api = FakeTileApi::with_grid(1, 5.0);
    let (mut controller, mut events) = started(&api).await;
    api.set_tile(
        0,
        TileSnapshot {
            state: TileState::LockedByOther,
            ttl: 40,
            message: String::new(),
        },
    );

    // when
    locked(&mut controller, &mut events, 0, "hello").await;

    // then
    let view = controller.view();
    assert_eq!(view.tiles[0].state, TileState::LockedByOther);
    assert_eq!(view.tiles[0].draft, "");
    assert!(controller.timers().retry(0).is_none());
}

#[tokio::test(start_paused = true)]
async fn request_lock__rejects_tiles_that_are_not_open() {
    // given
    let api = FakeTileApi::with_grid(2, 5.0);
    api.set_tile(
        1,
        TileSnapshot {
            state: TileState::Purchased,
            ttl: 100,
            message: "taken".to_string(),
        },
    );
    let (mut controller, _events) = started(&api).await;

    // then
    assert!(controller.request_lock(1, "hello").is_err());
    assert!(controller.request_lock(7, "hello").is_err());
    assert!(controller.request_lock(0, "").is_err());
    assert!(api.lock_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reconcile__shrinking_grid_cancels_orphaned_timers() {
    // given
    let api = FakeTileApi::with_grid(6, 5.0);
    let (mut controller, mut events) = started(&api).await;
    locked(&mut controller, &mut events, 4, "four").await;
    locked(&mut controller, &mut events, 5, "five").await;
    assert_eq!(controller.timers().retry_indices(), vec![4, 5]);
    assert_eq!(controller.timers().countdown_indices(), vec![4, 5]);

    // when
    api.resize(4);
    advance_and_settle(&mut controller, &mut events, 3 * SECOND, SECOND).await;

    // then
    assert_eq!(controller.view().tiles.len(), 4);
    assert!(controller.timers().retry_indices().is_empty());
    assert!(controller.timers().countdown_indices().is_empty());

    api.set_balance(0, 100.0);
    advance_and_settle(&mut controller, &mut events, 6 * SECOND, SECOND).await;
    assert!(api.purchases().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fetch_failure__keeps_the_last_model() {
    // given
    let api = FakeTileApi::with_grid(2, 5.0);
    let (mut controller, mut events) = started(&api).await;
    api.fail_fetches(true);
    api.set_tile(
        0,
        TileSnapshot {
            state: TileState::LockedByOther,
            ttl: 30,
            message: String::new(),
        },
    );

    // when
    advance_and_settle(&mut controller, &mut events, 6 * SECOND, SECOND).await;
    let during_outage = controller.view();
    api.fail_fetches(false);
    advance_and_settle(&mut controller, &mut events, 3 * SECOND, SECOND).await;

    // then
    assert_eq!(during_outage.tiles.len(), 2);
    assert_eq!(during_outage.tiles[0].state, TileState::Open);
    assert_eq!(controller.view().tiles[0].state, TileState::LockedByOther);
}

#[tokio::test(start_paused = true)]
async fn shutdown__cancels_timers_and_stops_fetching() {
    // given
    let api = FakeTileApi::with_grid(1, 5.0);
    let (mut controller, mut events) = started(&api).await;
    locked(&mut controller, &mut events, 0, "hello").await;

    // when
    controller.shutdown().await;
    let requests = api.tile_requests();
    tokio::time::advance(10 * SECOND).await;
    settle(&mut controller, &mut events).await;

    // then
    assert!(controller.timers().countdown_indices().is_empty());
    assert!(controller.timers().retry_indices().is_empty());
    assert_eq!(api.tile_requests(), requests);
}
