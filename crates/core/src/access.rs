//! Who may do what to which entity.
//!
//! A plain function over (actor, action, subject). Admins may do anything;
//! everyone else is limited to what they own.

use crate::domain::{Contract, Order, SelfBillingInvoice, Storage, User};
use crate::types::UserId;

/// The user performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub is_admin: bool,
    pub is_landlord: bool,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            is_admin: user.is_admin,
            is_landlord: user.is_landlord,
        }
    }
}

/// Requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Edit,
    Delete,
    Pay,
    Cancel,
    Terminate,
}

/// Entity the operation targets.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Order(&'a Order),
    /// A contract with the owner of the unit it covers.
    Contract {
        contract: &'a Contract,
        storage_owner: UserId,
    },
    Storage(&'a Storage),
    Invoice(&'a SelfBillingInvoice),
}

/// Access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decide whether `actor` may perform `action` on `subject`.
#[must_use]
pub fn decide(actor: &Actor, action: Action, subject: Subject<'_>) -> Decision {
    if actor.is_admin {
        return Decision::Allow;
    }

    let allowed = match subject {
        Subject::Order(order) => {
            order.user_id == actor.id
                && matches!(action, Action::View | Action::Pay | Action::Cancel)
        }
        Subject::Contract {
            contract,
            storage_owner,
        } => {
            let owner = contract.user_id == actor.id
                && matches!(action, Action::View | Action::Terminate);
            let landlord =
                actor.is_landlord && storage_owner == actor.id && action == Action::View;
            owner || landlord
        }
        Subject::Storage(storage) => {
            actor.is_landlord
                && storage.owner_id == actor.id
                && matches!(action, Action::View | Action::Edit | Action::Delete)
        }
        Subject::Invoice(invoice) => {
            actor.is_landlord && invoice.landlord_id == actor.id && action == Action::View
        }
    };

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny
    }
}
