//! Campaign execution engine
//!
//! Turns a campaign's contact rows into outbound voice-agent calls under a
//! concurrency budget. One [`DispatcherActor`](actors::DispatcherActor) runs
//! per campaign, reading row snapshots from a [`RowStore`](store::RowStore)
//! and placing calls through a [`CallPlacement`](placement::CallPlacement).

pub mod actors;
pub mod campaign;
pub mod config;
pub mod hydrator;
pub mod initiator;
pub mod placement;
pub mod projector;
pub mod store;
