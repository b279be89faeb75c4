//! Pure rendering rules for a single tile.
//!
//! Authoritative transitions are only ever observed through reconciliation;
//! nothing in here changes a tile's state.

use crate::model::{
    TileSnapshot,
    TileState,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use url::Url;

pub const DEFAULT_QR_PROVIDER: &str = "https://chart.googleapis.com/chart";
pub const DEFAULT_QR_SIZE: u32 = 200;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileMode {
    /// Draft field is editable. On an open tile the lock affordance is only
    /// enabled once the draft is non-empty; on a held tile there is nothing to
    /// lock and `lock_enabled` is false.
    Editable { lock_enabled: bool },
    Payment { countdown_secs: u64 },
    LockedByOther { countdown_secs: u64 },
    Purchased { message: String, countdown_secs: u64 },
}

impl TileMode {
    pub fn countdown_secs(&self) -> Option<u64> {
        match self {
            Self::Editable { .. } => None,
            Self::Payment { countdown_secs }
            | Self::LockedByOther { countdown_secs }
            | Self::Purchased { countdown_secs, .. } => Some(*countdown_secs),
        }
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::Editable { .. } | Self::Payment { .. })
    }
}

pub fn render_mode(snapshot: &TileSnapshot, draft: &str) -> TileMode {
    let countdown_secs = snapshot.remaining_secs();
    match snapshot.state {
        TileState::Open => TileMode::Editable {
            lock_enabled: !draft.is_empty(),
        },
        TileState::LockedByCurrentUser if draft.is_empty() => {
            TileMode::Editable {
                lock_enabled: false,
            }
        }
        TileState::LockedByCurrentUser => TileMode::Payment { countdown_secs },
        TileState::LockedByOther => TileMode::LockedByOther { countdown_secs },
        TileState::Purchased => TileMode::Purchased {
            message: snapshot.message.clone(),
            countdown_secs,
        },
    }
}

/// Whether `from -> to` is one of the transitions the server is expected to
/// produce. Anything else still gets applied, it just means a poll was missed.
pub fn is_observable_transition(from: TileState, to: TileState) -> bool {
    use TileState::*;
    matches!(
        (from, to),
        (Open, LockedByCurrentUser | LockedByOther)
            | (LockedByCurrentUser, Purchased | Open)
            | (LockedByOther, Open | Purchased)
    ) || from == to
}

pub fn state_label(state: TileState) -> &'static str {
    match state {
        TileState::Open => "Open",
        TileState::LockedByCurrentUser => "Locked by current user",
        TileState::LockedByOther => "Locked by other",
        TileState::Purchased => "Purchased",
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurchaseAffordance {
    MessageEmpty,
    InsufficientFunds,
    Ready,
}

impl PurchaseAffordance {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MessageEmpty => "Message is empty",
            Self::InsufficientFunds => "Insufficient funds",
            Self::Ready => "Purchase",
        }
    }
}

/// Unknown balance or price never counts as sufficient.
pub fn funds_sufficient(balance: Option<f64>, price: Option<f64>) -> bool {
    match (balance, price) {
        (Some(balance), Some(price)) => balance >= price,
        _ => false,
    }
}

pub fn purchase_affordance(
    draft: &str,
    balance: Option<f64>,
    price: Option<f64>,
) -> PurchaseAffordance {
    if draft.is_empty() {
        PurchaseAffordance::MessageEmpty
    } else if !funds_sufficient(balance, price) {
        PurchaseAffordance::InsufficientFunds
    } else {
        PurchaseAffordance::Ready
    }
}

pub fn qr_url(provider: &str, size: u32, address: &str) -> Result<Url> {
    let dimensions = format!("{size}x{size}");
    Url::parse_with_params(
        provider,
        &[("chs", dimensions.as_str()), ("cht", "qr"), ("chl", address)],
    )
    .wrap_err_with(|| format!("invalid QR provider URL {provider}"))
}
