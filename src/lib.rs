pub mod client;
pub mod config;
pub mod coordinator;
pub mod countdown;
pub mod event;
pub mod fetcher;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod tile_client;
pub mod tile_state;
pub mod timer;
pub mod ui;

pub mod test_helpers;
