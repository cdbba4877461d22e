//! DispatcherActor - turns campaign rows into outbound calls
//!
//! One actor runs per campaign. It:
//! - Consumes row snapshots pushed by the row store
//! - Keeps `calling` rows at or below the campaign's concurrency limit
//! - Hands each selected row to a spawned [`CallInitiator`](crate::initiator::CallInitiator) task
//! - Exposes start/pause/resume/stop/reset/relaunch controls
//! - Goes idle on its own once no pending or in-flight rows remain
//!
//! ## State Machine
//!
//! ```text
//! Idle --start--> Running --pause--> Paused
//!  ^                 |  ^--resume------|
//!  |                 |                 |
//!  +------stop-------+-------stop------+
//!  +---- all rows settled (auto) ------+
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use campaign_engine::actors::dispatcher::{self, spawn_dispatcher, DispatcherArguments};
//!
//! let (dispatcher_ref, _handle) = spawn_dispatcher(DispatcherArguments {
//!     context,
//!     store,
//!     placement,
//! })
//! .await?;
//! dispatcher::start(&dispatcher_ref, None)?;
//! ```

pub mod actor;
pub mod protocol;
pub mod state;

pub use actor::{spawn_dispatcher, DispatcherActor, DispatcherArguments};
pub use protocol::{
    pause, relaunch, reset_rows, resume, start, status, stop, subscribe, update_calling_config,
    DispatcherError, DispatcherMsg,
};
pub use state::{ControlCommand, DispatcherState};

#[cfg(test)]
mod tests;
