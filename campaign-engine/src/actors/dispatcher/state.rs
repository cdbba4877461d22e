//! Dispatcher state transitions
//!
//! `DispatcherState` is a small value type. Control commands and completion
//! detection return a new state instead of mutating in place; the actor swaps
//! it in. Row selection helpers are pure functions over a snapshot.

use shared_types::{CampaignRow, CampaignTotals, DispatcherMode, RowStatus};
use std::collections::HashSet;

/// Operator controls that move the dispatcher between modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherState {
    pub mode: DispatcherMode,
    pub totals: CampaignTotals,
}

impl DispatcherState {
    pub fn is_running(&self) -> bool {
        self.mode == DispatcherMode::Running
    }

    /// `Idle -> Running <-> Paused`, `stop` from anywhere.
    /// Pausing an idle dispatcher and resuming a non-paused one are no-ops.
    pub fn apply(self, command: ControlCommand) -> Self {
        let mode = match (command, self.mode) {
            (ControlCommand::Start, _) => DispatcherMode::Running,
            (ControlCommand::Pause, DispatcherMode::Running) => DispatcherMode::Paused,
            (ControlCommand::Resume, DispatcherMode::Paused) => DispatcherMode::Running,
            (ControlCommand::Stop, _) => DispatcherMode::Idle,
            (ControlCommand::Pause | ControlCommand::Resume, mode) => mode,
        };
        Self { mode, ..self }
    }

    /// Record fresh totals and auto-idle a running campaign with no work left.
    pub fn observe(self, totals: CampaignTotals) -> Self {
        let mode = if self.is_running() && is_complete(&totals) {
            DispatcherMode::Idle
        } else {
            self.mode
        };
        Self { mode, totals }
    }
}

/// Nothing pending, nothing in flight, and at least one valid row.
pub fn is_complete(totals: &CampaignTotals) -> bool {
    totals.pending_count == 0 && totals.active_calls == 0 && totals.total_rows > 0
}

/// Free slots under `limit` given `active` in-flight rows.
pub fn available_slots(limit: u32, active: usize) -> usize {
    (limit.max(1) as usize).saturating_sub(active)
}

/// Rows this dispatcher claimed that the snapshot still shows as `pending`.
pub fn unobserved_claims(
    rows: &[CampaignRow],
    phone_column: &str,
    claimed: &HashSet<String>,
) -> usize {
    rows.iter()
        .filter(|row| {
            row.status == RowStatus::Pending
                && claimed.contains(&row.id)
                && row.has_valid_phone(phone_column)
        })
        .count()
}

/// First `slots` pending, phone-valid, unclaimed rows in ascending id order.
pub fn select_dispatchable<'a>(
    rows: &'a [CampaignRow],
    phone_column: &str,
    claimed: &HashSet<String>,
    slots: usize,
) -> Vec<&'a CampaignRow> {
    let mut candidates: Vec<&CampaignRow> = rows
        .iter()
        .filter(|row| {
            row.status == RowStatus::Pending
                && !claimed.contains(&row.id)
                && row.has_valid_phone(phone_column)
        })
        .collect();
    candidates.sort_by(|a, b| a.id.cmp(&b.id));
    candidates.truncate(slots);
    candidates
}

/// Phone-valid rows at position `from_index` onwards, rows sorted by id.
pub fn reset_targets<'a>(
    rows: &'a [CampaignRow],
    from_index: usize,
    phone_column: &str,
) -> Vec<&'a CampaignRow> {
    let mut sorted: Vec<&CampaignRow> = rows.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    sorted
        .into_iter()
        .skip(from_index)
        .filter(|row| row.has_valid_phone(phone_column))
        .collect()
}
