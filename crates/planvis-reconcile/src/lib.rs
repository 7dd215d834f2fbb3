//! Visibility reconciliation for broker catalogs.
//!
//! Whenever a broker's catalog is created or updated, the stored visibility
//! records of each of its plans are brought in line with a
//! [`VisibilityPolicy`]:
//! - a plan the policy marks public ends up with exactly one public
//!   visibility and no platform-scoped ones
//! - any other plan loses its public visibility and keeps its scoped ones
//!
//! The whole broker is reconciled inside one storage transaction, see
//! [`reconcile_broker`].

mod error;
mod policy;
mod reconciler;
mod report;
mod scope;

pub use error::{PolicyError, ReconcileError};
pub use policy::{AbsentFlag, DEFAULT_METADATA_KEY, FnPolicy, MetadataFlagPolicy, VisibilityPolicy};
pub use reconciler::Reconciler;
pub use report::ReconcileReport;
pub use scope::reconcile_broker;
