//! Shared types between the campaign engine and the dashboard
//!
//! These types are used by both:
//! - the campaign engine (dispatcher actor, row store adapters, runner)
//! - the dashboard UI (TypeScript bindings generated with ts-rs)
//!
//! Serializable with serde; the JSON shape matches the row store documents and
//! the call placement service payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use ts_rs::TS;
use validator::Validate;

/// Minimum trimmed length for a phone value to be schedulable.
pub const MIN_PHONE_LENGTH: usize = 7;

/// Reserved dynamic variable carrying the hydrated campaign prompt.
pub const CAMPAIGN_PROMPT_VARIABLE: &str = "campaign_prompt";

/// `last_error` written when a row has no phone value at all.
pub const NO_PHONE_ERROR: &str = "No phone number provided";

/// Phone column id used when a campaign does not configure one.
pub const DEFAULT_PHONE_COLUMN: &str = "phone";

/// Whether a raw phone cell is long enough to be called.
pub fn is_valid_phone(value: &str) -> bool {
    value.trim().chars().count() >= MIN_PHONE_LENGTH
}

// ============================================================================
// Rows
// ============================================================================

/// Call lifecycle of a single campaign row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    /// Waiting to be dispatched
    #[default]
    Pending,
    /// A call was dispatched and has not reported a final outcome yet
    Calling,
    Completed,
    Failed,
    NoAnswer,
}

impl RowStatus {
    /// Final outcome reached; only an explicit reset moves the row again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::NoAnswer)
    }

    /// Counted in the failed bucket of campaign totals.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::NoAnswer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Calling => "calling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NoAnswer => "no_answer",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "calling" => Ok(Self::Calling),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "no_answer" => Ok(Self::NoAnswer),
            _ => Err(format!("Invalid row status: {s}")),
        }
    }
}

/// One contact/job unit of a campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CampaignRow {
    /// Stable, sortable identity; dispatch order is ascending `id`
    pub id: String,
    pub campaign_id: String,
    /// Field values keyed by column id
    #[serde(default)]
    pub data: HashMap<String, String>,
    #[serde(default)]
    pub status: RowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_at: Option<DateTime<Utc>>,
}

impl CampaignRow {
    /// New pending row
    pub fn new(
        id: impl Into<String>,
        campaign_id: impl Into<String>,
        data: HashMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            campaign_id: campaign_id.into(),
            data,
            status: RowStatus::Pending,
            call_id: None,
            last_error: None,
            called_at: None,
        }
    }

    /// Raw phone cell for the configured phone column
    pub fn phone(&self, phone_column: &str) -> Option<&str> {
        self.data.get(phone_column).map(String::as_str)
    }

    /// Rows failing this check are never scheduled and never counted.
    pub fn has_valid_phone(&self, phone_column: &str) -> bool {
        self.phone(phone_column).is_some_and(is_valid_phone)
    }
}

/// Column definition mapping a field id to a template variable name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CampaignColumn {
    pub id: String,
    /// Sanitized identifier used as the template variable name
    pub key: String,
    pub label: String,
}

impl CampaignColumn {
    /// Build a column whose key is derived from the label.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: id.into(),
            key: sanitize_column_key(&label),
            label,
        }
    }
}

/// Derive a template variable name from a human label.
///
/// `"Fecha de Cita"` becomes `"fecha_de_cita"`, `"Teléfono (móvil)"` becomes
/// `"teléfono_móvil"`.
pub fn sanitize_column_key(label: &str) -> String {
    let mut key = String::with_capacity(label.len());
    let mut pending_separator = false;
    for ch in label.trim().chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_separator = !key.is_empty();
            continue;
        }
        if !ch.is_alphanumeric() {
            continue;
        }
        if pending_separator {
            key.push('_');
            pending_separator = false;
        }
        key.extend(ch.to_lowercase());
    }
    key
}

// ============================================================================
// Configuration
// ============================================================================

/// Per-campaign calling parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, TS)]
#[ts(export)]
pub struct CallingConfig {
    #[validate(length(min = 1, message = "from_number is required"))]
    pub from_number: String,
    /// Target number of simultaneous `calling` rows
    #[validate(range(min = 1, message = "concurrency_limit must be at least 1"))]
    pub concurrency_limit: u32,
    /// Metadata only: the engine never retries on its own
    #[serde(default)]
    pub retry_failed: bool,
    #[serde(default)]
    pub target_country_code: String,
}

impl Default for CallingConfig {
    fn default() -> Self {
        Self {
            from_number: String::new(),
            concurrency_limit: 1,
            retry_failed: false,
            target_country_code: String::new(),
        }
    }
}

// ============================================================================
// Dispatcher status
// ============================================================================

/// Scheduling mode of a campaign dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherMode {
    #[default]
    Idle,
    Running,
    Paused,
}

impl fmt::Display for DispatcherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Counters projected from a row snapshot (valid-phone rows only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CampaignTotals {
    pub total_rows: usize,
    pub completed_count: usize,
    /// `failed` plus `no_answer`
    pub failed_count: usize,
    pub pending_count: usize,
    /// Rows currently `calling`
    pub active_calls: usize,
}

/// Read-only dispatcher view exposed to the UI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DispatcherStatus {
    pub campaign_id: String,
    pub mode: DispatcherMode,
    pub totals: CampaignTotals,
    /// True once any valid row reached a final outcome
    pub has_been_run: bool,
}

// ============================================================================
// Call placement payloads
// ============================================================================

/// Correlation data echoed back by call-result webhooks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CallMetadata {
    pub campaign_id: String,
    pub row_id: String,
}

/// Outbound call request sent to the call placement service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CallRequest {
    pub from_number: String,
    pub to_number: String,
    pub agent_id: String,
    /// Column keys to row values, plus `campaign_prompt`
    pub dynamic_variables: BTreeMap<String, String>,
    pub metadata: CallMetadata,
}

/// Successful call placement response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CallResponse {
    pub call_id: String,
}

// ============================================================================
// Tests
// ============================================================================
