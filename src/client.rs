use crate::{
    config::GridConfig,
    coordinator::{
        LockRequestCoordinator,
        dispatch_purchase,
    },
    event::{
        GridEvent,
        GridEventReceiver,
        GridEventSender,
    },
    fetcher::{
        FetchCommand,
        FetchCommandSender,
        RemoteStateFetcher,
    },
    model::{
        GridStore,
        Snapshot,
        TileState,
    },
    reconcile::{
        Reconciliation,
        reconcile,
    },
    registry::TimerRegistry,
    retry::PurchasePhase,
    tile_client::{
        TileApi,
        TileClient,
    },
    tile_state::{
        PurchaseAffordance,
        TileMode,
        is_observable_transition,
        purchase_affordance,
        qr_url,
        render_mode,
        state_label,
    },
    ui,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

const MAX_ERRORS: usize = 5;

/// Everything the terminal needs to draw one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridView {
    pub tiles: Vec<TileCard>,
    pub balance: Option<f64>,
    pub price: Option<f64>,
    pub status: String,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TileCard {
    pub index: usize,
    pub address: String,
    pub state: TileState,
    pub state_label: &'static str,
    pub mode: TileMode,
    pub draft: String,
    pub countdown: Option<String>,
    pub qr_url: Option<String>,
    /// Only present while the user holds the lock.
    pub affordance: Option<PurchaseAffordance>,
    pub lock_pending: bool,
    pub purchase_phase: Option<PurchasePhase>,
}

/// Composition root: owns the store and the timer registry and applies every
/// [`GridEvent`]. Network requests and timers run as tasks that only report
/// back through the event channel.
pub struct GridController<A: TileApi> {
    config: GridConfig,
    api: A,
    store: GridStore,
    timers: TimerRegistry,
    locks: LockRequestCoordinator<A>,
    events: GridEventSender,
    fetch_tx: FetchCommandSender,
    fetch_worker: Option<JoinHandle<Result<()>>>,
    status: String,
    errors: Vec<String>,
    loaded: bool,
}

impl<A: TileApi> GridController<A> {
    /// Spawns the fetch worker and returns the controller together with the
    /// receiving end of its event channel. The first snapshot is requested
    /// immediately.
    pub fn start(api: A, config: GridConfig) -> (Self, GridEventReceiver) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let fetch_worker = tokio::spawn(RemoteStateFetcher::new(api.clone()).run(
            config.refresh,
            fetch_rx,
            events.clone(),
        ));
        let timers = TimerRegistry::new(config.tick, config.retry, events.clone());
        let locks = LockRequestCoordinator::new(api.clone(), events.clone());
        info!(
            refresh_ms = config.refresh.as_millis() as u64,
            retry_ms = config.retry.as_millis() as u64,
            tick_ms = config.tick.as_millis() as u64,
            "grid controller started"
        );
        let controller = Self {
            config,
            api,
            store: GridStore::new(),
            timers,
            locks,
            events,
            fetch_tx,
            fetch_worker: Some(fetch_worker),
            status: "Loading tiles...".to_string(),
            errors: Vec::new(),
            loaded: false,
        };
        (controller, event_rx)
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn store(&self) -> &GridStore {
        &self.store
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }

    fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        if self.errors.len() > MAX_ERRORS {
            let overflow = self.errors.len() - MAX_ERRORS;
            self.errors.drain(..overflow);
        }
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Asks the fetch worker for an out-of-band refresh under a fresh ticket.
    pub fn force_refresh(&mut self) {
        let ticket = self.store.issue_ticket();
        self.request_fetch(FetchCommand::FetchNow(ticket));
    }

    fn request_fetch(&self, command: FetchCommand) {
        if self.fetch_tx.send(command).is_err() {
            warn!(?command, "fetch worker is gone");
        }
    }

    /// Applies one event. Returns whether anything visible changed.
    pub fn handle_event(&mut self, event: GridEvent) -> bool {
        match event {
            GridEvent::Snapshot(snapshot) => {
                self.apply_snapshot(snapshot);
                true
            }
            GridEvent::CountdownTick { index, generation } => {
                self.timers.on_countdown_tick(index, generation)
            }
            GridEvent::RetryTick { index, generation } => {
                let Some(order) =
                    self.timers
                        .on_retry_tick(index, generation, self.store.model())
                else {
                    return false;
                };
                self.set_status(format!("Purchasing tile {index}..."));
                dispatch_purchase(&self.api, order, &self.events);
                true
            }
            GridEvent::LockFinished {
                index,
                message,
                outcome,
            } => {
                self.locks.finish(index);
                match outcome {
                    Ok(ack) => {
                        info!(index, state = ?ack.state, "lock acknowledged");
                        let ticket = self.store.issue_ticket();
                        if let Err(err) = self.store.write_draft(index, message, ticket) {
                            warn!(?err, index, "dropping draft for acknowledged lock");
                        }
                        self.request_fetch(FetchCommand::FetchNow(ticket));
                        self.set_status(format!("Lock requested for tile {index}"));
                    }
                    Err(err) => {
                        warn!(?err, index, "lock request failed");
                        self.push_error(format!("Lock for tile {index} failed: {err}"));
                    }
                }
                true
            }
            GridEvent::PurchaseFinished {
                index,
                generation,
                outcome,
            } => {
                let succeeded = outcome.is_ok();
                if !self.timers.on_purchase_finished(index, generation, succeeded) {
                    debug!(index, generation, "purchase result for a disarmed cycle");
                }
                match outcome {
                    Ok(ack) => {
                        info!(index, transaction_id = ?ack.transaction_id, "purchase sent");
                        self.set_status(match ack.transaction_id {
                            Some(txid) => format!("Purchased tile {index} (tx {txid})"),
                            None => format!("Purchased tile {index}"),
                        });
                        self.force_refresh();
                    }
                    Err(err) => {
                        warn!(?err, index, "purchase failed; retrying on next tick");
                        self.push_error(format!("Purchase of tile {index} failed: {err}"));
                    }
                }
                true
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        let previous: Vec<TileState> = self
            .store
            .model()
            .tiles
            .iter()
            .map(|tile| tile.view.state())
            .collect();
        let Reconciliation {
            model,
            removed,
            drafts_kept,
            drafts_cleared,
        } = reconcile(self.store.model(), snapshot);

        for tile in &model.tiles {
            let Some(from) = previous.get(tile.index).copied() else {
                continue;
            };
            let to = tile.view.state();
            if !is_observable_transition(from, to) {
                debug!(index = tile.index, ?from, ?to, "unexpected tile transition");
            } else if from != to {
                info!(index = tile.index, ?from, ?to, "tile state changed");
            }
        }
        if drafts_cleared > 0 {
            debug!(drafts_kept, drafts_cleared, "drafts cleared by reconciliation");
        }

        self.timers.teardown(&removed);
        self.store.replace(model);
        self.timers.sync(self.store.model());
        if !self.loaded {
            self.loaded = true;
            self.set_status(format!("{} tiles loaded", self.store.len()));
        }
    }

    /// Lock intent for an `OPEN` tile, carrying the draft typed so far.
    pub fn request_lock(&mut self, index: usize, message: &str) -> Result<()> {
        let Some(tile) = self.store.tile(index) else {
            warn!(index, "lock request outside the grid ignored");
            return Err(eyre!("tile {index} is not part of the grid"));
        };
        let state = tile.view.state();
        if state != TileState::Open {
            return Err(eyre!("tile {index} is {}", state_label(state)));
        }
        self.locks.request_lock(index, message.to_string())?;
        self.set_status(format!("Locking tile {index}..."));
        Ok(())
    }

    /// Draft intent for a tile the user already holds.
    pub fn edit_draft(&mut self, index: usize, message: &str) -> Result<()> {
        self.store.edit_draft(index, message.to_string())?;
        self.timers.sync(self.store.model());
        Ok(())
    }

    /// Manual purchase intent: evaluates the retry condition right away.
    pub fn purchase_now(&mut self, index: usize) -> Result<()> {
        let model = self.store.model();
        let tile = model
            .tiles
            .get(index)
            .ok_or_else(|| eyre!("tile {index} is not part of the grid"))?;
        let affordance =
            purchase_affordance(tile.view.draft_message(), model.balance, model.price);
        if tile.view.state() != TileState::LockedByCurrentUser {
            return Err(eyre!("tile {index} is not locked by you"));
        }
        if affordance != PurchaseAffordance::Ready {
            return Err(eyre!("tile {index}: {}", affordance.label()));
        }
        let order = self
            .timers
            .purchase_now(index, self.store.model())
            .ok_or_else(|| eyre!("a purchase for tile {index} is already under way"))?;
        self.set_status(format!("Purchasing tile {index}..."));
        dispatch_purchase(&self.api, order, &self.events);
        Ok(())
    }

    pub fn view(&self) -> GridView {
        let model = self.store.model();
        let tiles = model
            .tiles
            .iter()
            .map(|tile| {
                let index = tile.index;
                let snapshot = tile.view.authoritative();
                let draft = tile.view.draft_message();
                let mode = render_mode(snapshot, draft);
                let address = self
                    .store
                    .address(index)
                    .map(|address| address.address.clone())
                    .unwrap_or_default();
                let countdown = mode
                    .countdown_secs()
                    .and(self.timers.countdown(index))
                    .map(|countdown| countdown.render());
                let qr = match mode {
                    TileMode::Payment { .. } => {
                        match qr_url(&self.config.qr_provider, self.config.qr_size, &address) {
                            Ok(url) => Some(url.to_string()),
                            Err(err) => {
                                warn!(?err, index, "cannot build QR url");
                                None
                            }
                        }
                    }
                    _ => None,
                };
                let affordance = (snapshot.state == TileState::LockedByCurrentUser)
                    .then(|| purchase_affordance(draft, model.balance, model.price));
                TileCard {
                    index,
                    address,
                    state: snapshot.state,
                    state_label: state_label(snapshot.state),
                    mode,
                    draft: draft.to_string(),
                    countdown,
                    qr_url: qr,
                    affordance,
                    lock_pending: self.locks.is_pending(index),
                    purchase_phase: self.timers.retry(index).map(|retry| retry.phase()),
                }
            })
            .collect();
        GridView {
            tiles,
            balance: model.balance,
            price: model.price,
            status: self.status.clone(),
            errors: self.errors.clone(),
        }
    }

    /// Cancels every timer and stops the fetch worker.
    pub async fn shutdown(&mut self) {
        self.timers.shutdown();
        self.request_fetch(FetchCommand::Shutdown);
        if let Some(worker) = self.fetch_worker.take() {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(?err, "fetch worker ended with an error"),
                Err(err) => warn!(?err, "fetch worker panicked"),
            }
        }
        info!("grid controller stopped");
    }
}

impl<A: TileApi> Drop for GridController<A> {
    fn drop(&mut self) {
        if let Some(worker) = self.fetch_worker.take() {
            worker.abort();
        }
    }
}

pub async fn run_app(config: GridConfig) -> Result<()> {
    let api = TileClient::new(config.server_url.clone())?;
    let (controller, events) = GridController::start(api, config);
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(controller, events, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;
    res
}

async fn run_loop<A: TileApi>(
    mut controller: GridController<A>,
    mut events: GridEventReceiver,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    info!("Running app loop");
    ui::draw(ui_state, &controller.view()).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else {
                    warn!("grid event channel closed");
                    break;
                };
                if controller.handle_event(event) {
                    ui::draw(ui_state, &controller.view())
                        .wrap_err("draw after grid event failed")?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let view = controller.view();
                let Some(ev) = ui::interpret_event(ui_state, &view, event) else {
                    continue;
                };
                let outcome = match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => Ok(()),
                    ui::UserEvent::RequestLock { index, message } => {
                        controller.request_lock(index, &message)
                    }
                    ui::UserEvent::EditDraft { index, message } => {
                        controller.edit_draft(index, &message)
                    }
                    ui::UserEvent::Purchase { index } => controller.purchase_now(index),
                    ui::UserEvent::DismissErrors => {
                        controller.clear_errors();
                        Ok(())
                    }
                };
                if let Err(err) = outcome {
                    error!(error = %err, "intent rejected");
                    controller.push_error(err.to_string());
                }
                ui::draw(ui_state, &controller.view())
                    .wrap_err("draw after user input failed")?;
            }
        }
    }
    controller.shutdown().await;
    Ok(())
}
