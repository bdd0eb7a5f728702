//! Contract termination.

use tracing::instrument;

use boxrent_core::access::{Action, Actor, Subject};
use boxrent_core::domain::Contract;
use boxrent_core::{ContractId, DomainEvent};

use super::{ServiceContext, authorize, availability};
use crate::error::{AppError, Result};
use crate::events::EventBuffer;

/// Service for customer-facing contract operations.
pub struct ContractService {
    ctx: ServiceContext,
}

impl ContractService {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// End an open-ended contract at the close of its paid period.
    ///
    /// The gateway recurrence is voided after the termination is stored; a
    /// failed void is logged and does not undo the termination.
    ///
    /// # Errors
    ///
    /// - `AppError::Forbidden` unless the actor may terminate the contract
    /// - `AppError::Domain` for limited or already terminated contracts
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn terminate_contract(
        &self,
        contract_id: ContractId,
        actor: &Actor,
    ) -> Result<Contract> {
        let mut contract = self
            .ctx
            .repos
            .contracts
            .get(contract_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("contract {contract_id}")))?;
        let storage = self
            .ctx
            .repos
            .storages
            .get(contract.storage_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("storage {}", contract.storage_id)))?;
        authorize(
            actor,
            Action::Terminate,
            Subject::Contract {
                contract: &contract,
                storage_owner: storage.owner_id,
            },
        )?;

        let recurrence = contract
            .active_recurring()
            .map(|billing| billing.parent_payment_id);
        let end_date = contract.terminate(self.ctx.clock.now())?;
        let contract = self.ctx.repos.contracts.save(&contract).await?;

        if let Some(parent) = recurrence
            && let Err(e) = self.ctx.gateway.void_recurrence(parent).await
        {
            tracing::error!(%parent, error = %e, "Failed to void recurrence of terminated contract");
        }
        availability::refresh_logged(&self.ctx, contract.storage_id).await;

        let mut events = EventBuffer::new();
        events.push(DomainEvent::ContractTerminated {
            contract_id,
            end_date,
        });
        self.ctx.events.publish(events).await;

        tracing::info!(%end_date, "Contract terminated");
        Ok(contract)
    }
}
