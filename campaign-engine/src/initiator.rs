//! Call initiator
//!
//! Turns one campaign row into one outbound call. The row is flipped
//! `pending -> calling` with a conditional write before the external request
//! goes out, so a row that another tick already claimed is never called twice.
//! Every failure is row-scoped and lands in `last_error`.

use chrono::Utc;
use shared_types::{
    CallMetadata, CallRequest, CampaignRow, RowStatus, CAMPAIGN_PROMPT_VARIABLE, NO_PHONE_ERROR,
};
use std::sync::Arc;

use crate::campaign::CampaignContext;
use crate::hydrator;
use crate::placement::{CallPlacement, PlacementError};
use crate::store::{RowPatch, RowStore, RowStoreError};

/// What happened to a row handed to [`CallInitiator::initiate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiationOutcome {
    /// No phone value; row marked failed without a call
    MissingPhone,
    /// Row was no longer `pending` when the claim was attempted
    NotClaimed,
    Placed { call_id: String },
    Failed { error: String },
    /// The store rejected a write; row state may be stale
    StoreUnavailable(String),
}

impl InitiationOutcome {
    /// True when this dispatcher never got the row into `calling`.
    pub fn released_claim(&self) -> bool {
        matches!(
            self,
            Self::MissingPhone | Self::NotClaimed | Self::StoreUnavailable(_)
        )
    }
}

#[derive(Clone)]
pub struct CallInitiator {
    store: Arc<dyn RowStore>,
    placement: Arc<dyn CallPlacement>,
}

impl CallInitiator {
    pub fn new(store: Arc<dyn RowStore>, placement: Arc<dyn CallPlacement>) -> Self {
        Self { store, placement }
    }

    pub async fn initiate(&self, row: &CampaignRow, ctx: &CampaignContext) -> InitiationOutcome {
        let phone = row
            .phone(&ctx.phone_column)
            .map(str::trim)
            .filter(|phone| !phone.is_empty());
        let Some(phone) = phone else {
            tracing::warn!(
                campaign_id = %ctx.campaign_id,
                row_id = %row.id,
                "Row has no phone number"
            );
            return match self
                .store
                .update_row_if(&row.id, RowStatus::Pending, RowPatch::failed(NO_PHONE_ERROR))
                .await
            {
                Ok(true) => InitiationOutcome::MissingPhone,
                Ok(false) => InitiationOutcome::NotClaimed,
                Err(e) => self.store_unavailable(row, ctx, e),
            };
        };
        let to_number: String = phone.chars().filter(|c| !c.is_whitespace()).collect();

        match self
            .store
            .update_row_if(&row.id, RowStatus::Pending, RowPatch::calling(Utc::now()))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    campaign_id = %ctx.campaign_id,
                    row_id = %row.id,
                    "Row no longer pending, skipping"
                );
                return InitiationOutcome::NotClaimed;
            }
            Err(e) => return self.store_unavailable(row, ctx, e),
        }

        let result = match build_request(row, ctx, to_number) {
            Ok(request) => self.placement.place_call(&request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => {
                tracing::info!(
                    campaign_id = %ctx.campaign_id,
                    row_id = %row.id,
                    call_id = %response.call_id,
                    "Call placed"
                );
                match self
                    .store
                    .update_row_if(
                        &row.id,
                        RowStatus::Calling,
                        RowPatch::call_placed(response.call_id.clone()),
                    )
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!(
                        row_id = %row.id,
                        "Row left calling before call_id was recorded"
                    ),
                    Err(e) => tracing::error!(
                        row_id = %row.id,
                        call_id = %response.call_id,
                        error = %e,
                        "Failed to record call_id"
                    ),
                }
                InitiationOutcome::Placed {
                    call_id: response.call_id,
                }
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(
                    campaign_id = %ctx.campaign_id,
                    row_id = %row.id,
                    error = %error,
                    "Call placement failed"
                );
                // A reset during the request owns the row now.
                match self
                    .store
                    .update_row_if(
                        &row.id,
                        RowStatus::Calling,
                        RowPatch::failed(error.clone()),
                    )
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!(
                        row_id = %row.id,
                        "Row left calling before the failure was recorded"
                    ),
                    Err(store_err) => tracing::error!(
                        row_id = %row.id,
                        error = %store_err,
                        "Failed to mark row as failed"
                    ),
                }
                InitiationOutcome::Failed { error }
            }
        }
    }

    fn store_unavailable(
        &self,
        row: &CampaignRow,
        ctx: &CampaignContext,
        error: RowStoreError,
    ) -> InitiationOutcome {
        tracing::error!(
            campaign_id = %ctx.campaign_id,
            row_id = %row.id,
            error = %error,
            "Row store write failed"
        );
        InitiationOutcome::StoreUnavailable(error.to_string())
    }
}

fn build_request(
    row: &CampaignRow,
    ctx: &CampaignContext,
    to_number: String,
) -> Result<CallRequest, PlacementError> {
    if ctx.calling.from_number.trim().is_empty() {
        return Err(PlacementError::Validation(
            "from_number is not configured".to_string(),
        ));
    }
    if ctx.agent_id.trim().is_empty() {
        return Err(PlacementError::Validation(
            "agent_id is not configured".to_string(),
        ));
    }

    let mut dynamic_variables = hydrator::build_variables(&row.data, &ctx.columns);
    let prompt = hydrator::hydrate_with(&ctx.prompt_template, &dynamic_variables);
    dynamic_variables.insert(CAMPAIGN_PROMPT_VARIABLE.to_string(), prompt);

    Ok(CallRequest {
        from_number: ctx.calling.from_number.clone(),
        to_number,
        agent_id: ctx.agent_id.clone(),
        dynamic_variables,
        metadata: CallMetadata {
            campaign_id: ctx.campaign_id.clone(),
            row_id: row.id.clone(),
        },
    })
}
