//! Visibility grant records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Platform id sentinel meaning "public, unrestricted".
pub const PUBLIC_PLATFORM_ID: &str = "";

/// A grant making one service plan usable, either by everyone or by a single platform.
///
/// At most one public grant may exist per plan. Any number of scoped grants
/// with distinct platform ids may coexist for the same plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visibility {
    pub id: String,
    pub service_plan_id: String,
    /// Empty for a public grant.
    #[serde(default)]
    pub platform_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Visibility {
    /// Creates an unrestricted grant for `service_plan_id`.
    pub fn public(
        id: impl Into<String>,
        service_plan_id: impl Into<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self::scoped(id, service_plan_id, PUBLIC_PLATFORM_ID, now)
    }

    /// Creates a grant restricted to `platform_id`.
    pub fn scoped(
        id: impl Into<String>,
        service_plan_id: impl Into<String>,
        platform_id: impl Into<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            service_plan_id: service_plan_id.into(),
            platform_id: platform_id.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_public(&self) -> bool {
        self.platform_id.is_empty()
    }
}
