//! Places, storage types, storage units and what occupies them.

use serde::{Deserialize, Serialize};

use crate::types::{
    CommissionRate, ContractId, Money, OrderId, PlaceId, RentalPeriod, StorageId, StorageStatus,
    StorageTypeId, UnavailabilityId, UserId,
};

/// A landlord's location holding storage units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    pub owner_id: UserId,
    pub name: String,
    pub address: String,
}

/// A rentable kind of unit within a place (size, price).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageType {
    pub id: StorageTypeId,
    pub place_id: PlaceId,
    pub name: String,
    pub dimensions: Option<String>,
    pub price_per_month: Money,
}

/// A single physical storage unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    pub id: StorageId,
    pub number: String,
    pub coordinates: Option<String>,
    pub storage_type_id: StorageTypeId,
    pub place_id: PlaceId,
    pub owner_id: UserId,
    /// Cached for listings; availability is always computed from claims.
    pub status: StorageStatus,
    /// Overrides the owner's default commission for payments on this unit.
    pub commission_rate: Option<CommissionRate>,
}

/// Landlord-entered period during which a unit cannot be rented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailabilityBlock {
    pub id: UnavailabilityId,
    pub storage_id: StorageId,
    pub period: RentalPeriod,
    pub reason: String,
}

/// What holds a claim on a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimSource {
    Order(OrderId),
    Contract(ContractId),
}

/// A non-terminal order or a contract occupying a unit for a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub source: ClaimSource,
    pub period: RentalPeriod,
}

/// A unit together with every claim and block on it.
///
/// Repositories load this in one query so availability never walks
/// relations lazily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOccupancy {
    pub storage: Storage,
    pub claims: Vec<Claim>,
    pub blocks: Vec<UnavailabilityBlock>,
}
