//! Host model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// A host that hits are recorded against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Host {
    pub id: i32,
    pub hostname: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Create host request
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateHost {
    pub hostname: String,
}
