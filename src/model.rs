use color_eyre::eyre::{
    Result,
    eyre,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Deposit address backing one tile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    pub balance: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TileState {
    Open,
    LockedByCurrentUser,
    LockedByOther,
    Purchased,
}

/// Authoritative per-tile record as reported by the server.
///
/// `ttl` is in seconds; the server reports `-1` for tiles without an expiry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSnapshot {
    pub state: TileState,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub message: String,
}

impl TileSnapshot {
    pub fn open() -> Self {
        Self {
            state: TileState::Open,
            ttl: -1,
            message: String::new(),
        }
    }

    pub fn remaining_secs(&self) -> u64 {
        u64::try_from(self.ttl).unwrap_or(0)
    }
}

/// Monotonic marker for refresh requests.
///
/// A snapshot carries the highest ticket the fetcher had seen when it issued
/// the request, so a draft can tell whether a snapshot was requested before or
/// after it was written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefreshTicket(pub u64);

impl RefreshTicket {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// A non-empty message typed by the user for a tile they hold the lock on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingDraft {
    pub message: String,
    pub ticket: RefreshTicket,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileView {
    Settled {
        authoritative: TileSnapshot,
    },
    Drafting {
        authoritative: TileSnapshot,
        draft: PendingDraft,
    },
}

impl TileView {
    pub fn settled(authoritative: TileSnapshot) -> Self {
        Self::Settled { authoritative }
    }

    pub fn authoritative(&self) -> &TileSnapshot {
        match self {
            Self::Settled { authoritative } | Self::Drafting { authoritative, .. } => {
                authoritative
            }
        }
    }

    pub fn draft(&self) -> Option<&PendingDraft> {
        match self {
            Self::Settled { .. } => None,
            Self::Drafting { draft, .. } => Some(draft),
        }
    }

    pub fn draft_message(&self) -> &str {
        self.draft().map_or("", |draft| draft.message.as_str())
    }

    pub fn state(&self) -> TileState {
        self.authoritative().state
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewTile {
    pub index: usize,
    pub view: TileView,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlobalViewModel {
    pub addresses: Vec<Address>,
    pub tiles: Vec<ViewTile>,
    pub balance: Option<f64>,
    pub price: Option<f64>,
}

/// Result of one fetch cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub addresses: Vec<Address>,
    pub tiles: Vec<TileSnapshot>,
    pub balance: Option<f64>,
    pub price: Option<f64>,
    pub ticket: RefreshTicket,
}

impl Snapshot {
    /// Builds a snapshot, truncating `addresses` and `tiles` to a common
    /// length so they stay index-aligned.
    pub fn new(
        mut addresses: Vec<Address>,
        mut tiles: Vec<TileSnapshot>,
        price: Option<f64>,
        ticket: RefreshTicket,
    ) -> Self {
        let balance = account_balance(&addresses);
        if addresses.len() != tiles.len() {
            tracing::warn!(
                addresses = addresses.len(),
                tiles = tiles.len(),
                "server returned misaligned addresses and tiles; truncating"
            );
            let len = addresses.len().min(tiles.len());
            addresses.truncate(len);
            tiles.truncate(len);
        }
        Self {
            addresses,
            tiles,
            balance,
            price,
            ticket,
        }
    }
}

/// Account balance under the single-address assumption: the balance of the
/// first address stands in for the whole account.
// TODO: replace once the server exposes an account-level balance endpoint.
pub fn account_balance(addresses: &[Address]) -> Option<f64> {
    addresses.first().map(|first| first.balance)
}

/// Owner of the [`GlobalViewModel`].
///
/// Authoritative state only changes through [`GridStore::replace`] with the
/// output of [`crate::reconcile::reconcile`]. Drafts change through the two
/// draft intents.
#[derive(Debug, Default)]
pub struct GridStore {
    model: GlobalViewModel,
    ticket: RefreshTicket,
}

impl GridStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self) -> &GlobalViewModel {
        &self.model
    }

    pub fn tile(&self, index: usize) -> Option<&ViewTile> {
        self.model.tiles.get(index)
    }

    pub fn address(&self, index: usize) -> Option<&Address> {
        self.model.addresses.get(index)
    }

    pub fn len(&self) -> usize {
        self.model.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.model.tiles.is_empty()
    }

    pub fn balance(&self) -> Option<f64> {
        self.model.balance
    }

    pub fn price(&self) -> Option<f64> {
        self.model.price
    }

    pub fn current_ticket(&self) -> RefreshTicket {
        self.ticket
    }

    pub fn issue_ticket(&mut self) -> RefreshTicket {
        self.ticket = self.ticket.next();
        self.ticket
    }

    pub fn replace(&mut self, model: GlobalViewModel) {
        self.model = model;
    }

    /// Records the draft of a freshly acknowledged lock.
    ///
    /// The tile's authoritative state is left untouched; only the next
    /// reconciliation can confirm the lock.
    pub fn write_draft(
        &mut self,
        index: usize,
        message: String,
        ticket: RefreshTicket,
    ) -> Result<()> {
        let tile = self
            .model
            .tiles
            .get_mut(index)
            .ok_or_else(|| eyre!("tile {index} is not part of the grid"))?;
        let authoritative = tile.view.authoritative().clone();
        tile.view = if message.is_empty() {
            TileView::Settled { authoritative }
        } else {
            TileView::Drafting {
                authoritative,
                draft: PendingDraft { message, ticket },
            }
        };
        Ok(())
    }

    /// Edits the draft of a tile the user already holds the lock on.
    pub fn edit_draft(&mut self, index: usize, message: String) -> Result<()> {
        let state = self
            .tile(index)
            .map(|tile| tile.view.state())
            .ok_or_else(|| eyre!("tile {index} is not part of the grid"))?;
        if state != TileState::LockedByCurrentUser {
            return Err(eyre!(
                "tile {index} is {state:?}; drafts can only be edited while holding the lock"
            ));
        }
        let ticket = self.ticket;
        self.write_draft(index, message, ticket)
    }
}
