//! DispatcherActor message protocol
//!
//! Defines the messages a campaign dispatcher consumes, its error type, and
//! small helpers that wrap `ractor::call!` for control callers.

use ractor::{ActorRef, RpcReplyPort};
use shared_types::{CallingConfig, CampaignRow, DispatcherStatus};
use tokio::sync::watch;

use crate::initiator::InitiationOutcome;
use crate::store::RowStoreError;

/// Messages handled by DispatcherActor
#[derive(Debug)]
pub enum DispatcherMsg {
    /// Fresh row snapshot from the store feed
    SnapshotChanged { rows: Vec<CampaignRow> },
    /// Replace calling parameters (concurrency limit included)
    UpdateCallingConfig { config: CallingConfig },
    /// Enter `Running`; an override replaces the cached prompt template
    Start { prompt_override: Option<String> },
    Pause,
    Resume,
    /// Back to `Idle`; in-flight calls are left alone
    Stop,
    /// Reset rows from `from_index` (sorted by id) back to `pending`
    ResetRows {
        from_index: usize,
        reply: RpcReplyPort<Result<usize, DispatcherError>>,
    },
    /// `ResetRows` followed by `Start`, in one step
    Relaunch {
        from_index: usize,
        prompt_override: Option<String>,
        reply: RpcReplyPort<Result<usize, DispatcherError>>,
    },
    /// Sent by initiation tasks when a row is done
    InitiationFinished {
        row_id: String,
        outcome: InitiationOutcome,
    },
    /// Delayed re-evaluation after a row was given back
    RetryTick,
    GetStatus {
        reply: RpcReplyPort<DispatcherStatus>,
    },
    Subscribe {
        reply: RpcReplyPort<watch::Receiver<DispatcherStatus>>,
    },
}

/// Errors that can occur in DispatcherActor
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DispatcherError {
    #[error("row store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dispatcher unavailable: {0}")]
    Unavailable(String),
}

impl From<RowStoreError> for DispatcherError {
    fn from(e: RowStoreError) -> Self {
        DispatcherError::Store(e.to_string())
    }
}

impl<T> From<ractor::RactorErr<T>> for DispatcherError {
    fn from(e: ractor::RactorErr<T>) -> Self {
        DispatcherError::Unavailable(e.to_string())
    }
}

fn send(dispatcher: &ActorRef<DispatcherMsg>, msg: DispatcherMsg) -> Result<(), DispatcherError> {
    dispatcher
        .send_message(msg)
        .map_err(|e| DispatcherError::Unavailable(e.to_string()))
}

pub fn start(
    dispatcher: &ActorRef<DispatcherMsg>,
    prompt_override: Option<String>,
) -> Result<(), DispatcherError> {
    send(dispatcher, DispatcherMsg::Start { prompt_override })
}

pub fn pause(dispatcher: &ActorRef<DispatcherMsg>) -> Result<(), DispatcherError> {
    send(dispatcher, DispatcherMsg::Pause)
}

pub fn resume(dispatcher: &ActorRef<DispatcherMsg>) -> Result<(), DispatcherError> {
    send(dispatcher, DispatcherMsg::Resume)
}

pub fn stop(dispatcher: &ActorRef<DispatcherMsg>) -> Result<(), DispatcherError> {
    send(dispatcher, DispatcherMsg::Stop)
}

pub fn update_calling_config(
    dispatcher: &ActorRef<DispatcherMsg>,
    config: CallingConfig,
) -> Result<(), DispatcherError> {
    send(dispatcher, DispatcherMsg::UpdateCallingConfig { config })
}

/// Returns how many rows went back to `pending`.
pub async fn reset_rows(
    dispatcher: &ActorRef<DispatcherMsg>,
    from_index: usize,
) -> Result<usize, DispatcherError> {
    ractor::call!(dispatcher, |reply| DispatcherMsg::ResetRows { from_index, reply })?
}

pub async fn relaunch(
    dispatcher: &ActorRef<DispatcherMsg>,
    from_index: usize,
    prompt_override: Option<String>,
) -> Result<usize, DispatcherError> {
    ractor::call!(dispatcher, |reply| DispatcherMsg::Relaunch {
        from_index,
        prompt_override,
        reply,
    })?
}

pub async fn status(
    dispatcher: &ActorRef<DispatcherMsg>,
) -> Result<DispatcherStatus, DispatcherError> {
    Ok(ractor::call!(dispatcher, |reply| DispatcherMsg::GetStatus {
        reply
    })?)
}

pub async fn subscribe(
    dispatcher: &ActorRef<DispatcherMsg>,
) -> Result<watch::Receiver<DispatcherStatus>, DispatcherError> {
    Ok(ractor::call!(dispatcher, |reply| DispatcherMsg::Subscribe {
        reply
    })?)
}
