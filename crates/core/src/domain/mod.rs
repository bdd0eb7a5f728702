//! Rental entities and their invariants.

pub mod contract;
pub mod invoice;
pub mod order;
pub mod payment;
pub mod storage;
pub mod user;

pub use contract::{BillingStrike, Contract, NewContract, RecurringBilling, SignedDocument};
pub use invoice::{InvoiceDraft, InvoiceNumberFormat, SelfBillingInvoice};
pub use order::{NewOrder, Order, OrderSignature};
pub use payment::{BillablePayment, NewPayment, Payment, PaymentLink};
pub use storage::{
    Claim, ClaimSource, Place, Storage, StorageOccupancy, StorageType, UnavailabilityBlock,
};
pub use user::User;
