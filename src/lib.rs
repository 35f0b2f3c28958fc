//! adhan-sync - premium entitlement, post-payment reconciliation and cloud
//! backup for the Adhan prayer app
//!
//! The three services ([`EntitlementStore`], [`PaymentReconciler`],
//! [`BackupCoordinator`]) share one durable key-value store and take every
//! collaborator (account API, cloud auth, notifier, clock) by injection.
//! Each owns its background timers and must be stopped on teardown.

pub mod api;
pub mod backup;
pub mod bridge;
pub mod clock;
pub mod cloud;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod models;
pub mod notify;
pub mod payments;
pub mod scheduler;
pub mod storage;

pub use backup::BackupCoordinator;
pub use entitlement::EntitlementStore;
pub use error::{Result, SyncError};
pub use payments::PaymentReconciler;
