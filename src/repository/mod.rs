//! Repository layer for hit storage

pub mod hits;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{Hit, HitFilter, HitKey, HitTotals, Host, NewHit},
};

/// Storage operations the hit engine relies on.
///
/// Implementations must reject a second row with the same [`HitKey`] on
/// insert with [`crate::AppError::Conflict`], a row for an unknown host with
/// [`crate::AppError::Invalid`] on `host_id`, and counts above
/// [`crate::models::hit::MAX_COUNT`].
///
/// The reporting operations (`most_recent_hit_on`, `top_hits`, `totals`)
/// must agree with [`crate::models::HitScope`] run over `list`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HitStore: Send + Sync {
    /// Whether a hit with this key is already stored
    async fn exists(&self, key: &HitKey) -> AppResult<bool>;

    async fn insert(&self, hit: &NewHit) -> AppResult<Hit>;

    /// Add `by` to the count of an existing hit
    async fn increment_count(&self, id: i64, by: i64) -> AppResult<Hit>;

    /// Hits matching the filter, most recent day first
    async fn list(&self, filter: &HitFilter) -> AppResult<Vec<Hit>>;

    /// Latest `hit_on` among the hits matching the filter
    async fn most_recent_hit_on(&self, filter: &HitFilter) -> AppResult<Option<NaiveDate>>;

    /// Hits matching the filter in count order, optionally summed across
    /// hosts per (path, status, day) and truncated to `limit`
    async fn top_hits(
        &self,
        filter: &HitFilter,
        aggregate: bool,
        limit: Option<usize>,
    ) -> AppResult<Vec<Hit>>;

    /// Summary totals over the hits matching the filter. `aggregate` only
    /// changes `most_hits`, which is then taken over the per-group sums.
    async fn totals(&self, filter: &HitFilter, aggregate: bool) -> AppResult<HitTotals>;

    /// Remove every hit, returning how many were deleted
    async fn delete_all(&self) -> AppResult<u64>;

    async fn find_or_create_host(&self, hostname: &str) -> AppResult<Host>;

    async fn host_exists(&self, host_id: i32) -> AppResult<bool>;
}

/// Main repository struct holding the hit store
#[derive(Clone)]
pub struct Repository {
    pub hits: Arc<dyn HitStore>,
}

impl Repository {
    /// Create a repository backed by PostgreSQL
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            hits: Arc::new(hits::HitsRepository::new(pool)),
        }
    }

    /// Create a repository backed by process memory
    pub fn in_memory() -> Self {
        Self {
            hits: Arc::new(memory::MemoryHitStore::new()),
        }
    }

    pub fn with_store(store: Arc<dyn HitStore>) -> Self {
        Self { hits: store }
    }
}
