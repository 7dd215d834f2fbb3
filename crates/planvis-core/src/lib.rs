//! Core catalog and visibility types for planvis.
//!
//! A broker advertises a catalog of service offerings, each holding an
//! ordered list of service plans. A [`Visibility`] grants access to one plan,
//! either to everyone (empty platform id) or to a single named platform.

pub mod catalog;
pub mod error;
pub mod id;
pub mod metadata;
pub mod time;
pub mod visibility;

pub use catalog::{Broker, ServiceOffering, ServicePlan};
pub use error::{CoreError, Result};
pub use id::{IdGenerator, SequenceIdGenerator, UuidGenerator, generate_id};
pub use metadata::{MetadataFlag, PlanMetadata};
pub use time::{Clock, FixedClock, SystemClock, now_utc};
pub use visibility::{PUBLIC_PLATFORM_ID, Visibility};
