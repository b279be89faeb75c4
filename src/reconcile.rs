use crate::model::{
    GlobalViewModel,
    RefreshTicket,
    Snapshot,
    TileSnapshot,
    TileState,
    TileView,
    ViewTile,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Reconciliation {
    pub model: GlobalViewModel,
    /// Indices present before but not after; their timers must be torn down
    /// before `model` replaces the current one.
    pub removed: Vec<usize>,
    pub drafts_kept: usize,
    pub drafts_cleared: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DraftOutcome {
    None,
    Kept,
    Cleared,
}

/// Merges a fetched snapshot into the current view model.
///
/// Addresses, balance and price are replaced wholesale (a snapshot without a
/// price keeps the known one). Tiles are walked by index: the authoritative
/// part is always replaced, the draft survives only while the tile is still
/// `LOCKED_BY_CURRENT_USER`, or while the snapshot predates the draft.
pub fn reconcile(current: &GlobalViewModel, snapshot: Snapshot) -> Reconciliation {
    let Snapshot {
        addresses,
        tiles,
        balance,
        price,
        ticket,
    } = snapshot;

    let mut drafts_kept = 0;
    let mut drafts_cleared = 0;
    let merged: Vec<ViewTile> = tiles
        .into_iter()
        .enumerate()
        .map(|(index, fresh)| {
            let prior = current.tiles.get(index).map(|tile| &tile.view);
            let (view, outcome) = carry_draft(prior, fresh, ticket);
            match outcome {
                DraftOutcome::Kept => drafts_kept += 1,
                DraftOutcome::Cleared => drafts_cleared += 1,
                DraftOutcome::None => {}
            }
            ViewTile { index, view }
        })
        .collect();

    let removed: Vec<usize> = (merged.len()..current.tiles.len()).collect();

    tracing::trace!(
        tiles = merged.len(),
        removed = removed.len(),
        drafts_kept,
        drafts_cleared,
        ?ticket,
        "reconciled snapshot"
    );

    Reconciliation {
        model: GlobalViewModel {
            addresses,
            tiles: merged,
            balance,
            price: price.or(current.price),
        },
        removed,
        drafts_kept,
        drafts_cleared,
    }
}

fn carry_draft(
    prior: Option<&TileView>,
    fresh: TileSnapshot,
    ticket: RefreshTicket,
) -> (TileView, DraftOutcome) {
    let Some(draft) = prior.and_then(TileView::draft) else {
        return (TileView::settled(fresh), DraftOutcome::None);
    };
    let still_ours = fresh.state == TileState::LockedByCurrentUser;
    let requested_before_draft = ticket < draft.ticket;
    if still_ours || requested_before_draft {
        (
            TileView::Drafting {
                authoritative: fresh,
                draft: draft.clone(),
            },
            DraftOutcome::Kept,
        )
    } else {
        (TileView::settled(fresh), DraftOutcome::Cleared)
    }
}
