//! Platform users: customers, landlords and administrators.

use serde::{Deserialize, Serialize};

use crate::types::{CommissionRate, UserId};

/// A registered user.
///
/// One account can both rent storage and own places; the flags are
/// capabilities rather than exclusive roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub is_admin: bool,
    pub is_landlord: bool,
    /// Landlord's share of gross payments unless a storage overrides it.
    pub commission_rate: CommissionRate,
    /// Number prefix for self-billing invoices; landlords without one are
    /// invoiced manually.
    pub self_billing_prefix: Option<String>,
}

impl User {
    /// The configured self-billing prefix, ignoring blank values.
    #[must_use]
    pub fn self_billing_prefix(&self) -> Option<&str> {
        self.self_billing_prefix
            .as_deref()
            .map(str::trim)
            .filter(|prefix| !prefix.is_empty())
    }
}
