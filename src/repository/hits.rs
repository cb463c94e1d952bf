//! Hits repository (PostgreSQL)
//!
//! Filtering, grouping across hosts, totals and limits run in SQL so that
//! reports never load a whole scope into the process.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Pool, Postgres};

use super::HitStore;
use crate::{
    error::{AppError, AppResult},
    models::{hit::unknown_host_errors, Hit, HitFilter, HitKey, HitTotals, Host, NewHit},
};

const HIT_COLUMNS: &str =
    "id, host_id, path, path_hash, http_status, count, hit_on, created_at, updated_at";

/// Columns of a row summed across hosts; per-row fields are NULL
const AGGREGATED_HIT_COLUMNS: &str = "NULL::BIGINT AS id, NULL::INTEGER AS host_id, \
     path, path_hash, http_status, SUM(count)::BIGINT AS count, hit_on, \
     NULL::TIMESTAMPTZ AS created_at, NULL::TIMESTAMPTZ AS updated_at";

/// Rows sharing these columns are summed when aggregating
const GROUP_COLUMNS: &str = "path, path_hash, http_status, hit_on";

/// Count order, with byte-wise text comparison
const COUNT_ORDER: &str =
    r#"count DESC, http_status COLLATE "C", path COLLATE "C", hit_on DESC"#;

/// Bind the parameters of [`where_clause`], in the same order
macro_rules! bind_filter {
    ($query:expr, $filter:expr) => {{
        let filter: &HitFilter = $filter;
        let mut query = $query;
        if let Some(host_id) = filter.host_id {
            query = query.bind(host_id);
        }
        if let Some(start) = filter.start_date {
            query = query.bind(start);
        }
        if let Some(end) = filter.end_date {
            query = query.bind(end);
        }
        if let Some(day) = filter.hit_on {
            query = query.bind(day);
        }
        if let Some(status) = &filter.http_status {
            query = query.bind(status.clone());
        }
        if let Some(statuses) = &filter.statuses {
            query = query.bind(statuses.clone());
        }
        query
    }};
}

/// `WHERE` clause for a filter, with `$n` placeholders bound by
/// [`bind_filter!`]
fn where_clause(filter: &HitFilter) -> String {
    let mut conditions = Vec::new();
    let mut idx = 1;

    if filter.host_id.is_some() {
        conditions.push(format!("host_id = ${}", idx));
        idx += 1;
    }
    if filter.start_date.is_some() {
        conditions.push(format!("hit_on >= ${}", idx));
        idx += 1;
    }
    if filter.end_date.is_some() {
        conditions.push(format!("hit_on <= ${}", idx));
        idx += 1;
    }
    if filter.hit_on.is_some() {
        conditions.push(format!("hit_on = ${}", idx));
        idx += 1;
    }
    if filter.http_status.is_some() {
        conditions.push(format!("http_status = ${}", idx));
        idx += 1;
    }
    if filter.statuses.is_some() {
        conditions.push(format!("http_status = ANY(${})", idx));
    }
    if filter.exclude_zero_status {
        conditions.push("http_status !~ '^0+$'".to_string());
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

fn limit_clause(limit: Option<usize>) -> String {
    limit.map(|n| format!("LIMIT {}", n)).unwrap_or_default()
}

#[derive(Clone)]
pub struct HitsRepository {
    pool: Pool<Postgres>,
}

impl HitsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// Map a unique index violation to a conflict and a missing host to a
/// `host_id` validation error; anything else is a database error
fn map_insert_error(error: sqlx::Error) -> AppError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            tracing::warn!("Duplicate hit rejected by unique index: {}", db.message());
            AppError::Conflict("Hit already exists for this host, path, status and date".to_string())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            tracing::warn!("Hit rejected for unknown host: {}", db.message());
            AppError::Invalid(unknown_host_errors())
        }
        _ => AppError::Database(error),
    }
}

/// Map the count bound check to a validation error
fn map_increment_error(error: sqlx::Error) -> AppError {
    match &error {
        sqlx::Error::Database(db) if db.is_check_violation() => {
            AppError::Validation("Count would exceed 2147483647".to_string())
        }
        _ => AppError::Database(error),
    }
}

#[async_trait]
impl HitStore for HitsRepository {
    async fn exists(&self, key: &HitKey) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM hits
                WHERE host_id = $1 AND path_hash = $2 AND http_status = $3 AND hit_on = $4
            )
            "#,
        )
        .bind(key.host_id)
        .bind(&key.path_hash)
        .bind(&key.http_status)
        .bind(key.hit_on)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert(&self, hit: &NewHit) -> AppResult<Hit> {
        let query = format!(
            r#"
            INSERT INTO hits (host_id, path, path_hash, http_status, count, hit_on)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            HIT_COLUMNS
        );

        sqlx::query_as::<_, Hit>(&query)
            .bind(hit.host_id)
            .bind(&hit.path)
            .bind(&hit.path_hash)
            .bind(&hit.http_status)
            .bind(hit.count)
            .bind(hit.hit_on)
            .fetch_one(&self.pool)
            .await
            .map_err(map_insert_error)
    }

    async fn increment_count(&self, id: i64, by: i64) -> AppResult<Hit> {
        let query = format!(
            "UPDATE hits SET count = count + $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            HIT_COLUMNS
        );

        sqlx::query_as::<_, Hit>(&query)
            .bind(id)
            .bind(by)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_increment_error)?
            .ok_or_else(|| AppError::NotFound(format!("Hit with id {} not found", id)))
    }

    async fn list(&self, filter: &HitFilter) -> AppResult<Vec<Hit>> {
        let query = format!(
            "SELECT {} FROM hits {} ORDER BY hit_on DESC, id",
            HIT_COLUMNS,
            where_clause(filter)
        );
        tracing::debug!("Loading hits: {}", query);

        let rows = bind_filter!(sqlx::query_as::<_, Hit>(&query), filter)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn most_recent_hit_on(&self, filter: &HitFilter) -> AppResult<Option<NaiveDate>> {
        let query = format!("SELECT MAX(hit_on) FROM hits {}", where_clause(filter));

        let day: Option<NaiveDate> =
            bind_filter!(sqlx::query_scalar::<_, Option<NaiveDate>>(&query), filter)
                .fetch_one(&self.pool)
                .await?;
        Ok(day)
    }

    async fn top_hits(
        &self,
        filter: &HitFilter,
        aggregate: bool,
        limit: Option<usize>,
    ) -> AppResult<Vec<Hit>> {
        let query = if aggregate {
            format!(
                "SELECT {} FROM hits {} GROUP BY {} ORDER BY {} {}",
                AGGREGATED_HIT_COLUMNS,
                where_clause(filter),
                GROUP_COLUMNS,
                COUNT_ORDER,
                limit_clause(limit)
            )
        } else {
            format!(
                "SELECT {} FROM hits {} ORDER BY {} {}",
                HIT_COLUMNS,
                where_clause(filter),
                COUNT_ORDER,
                limit_clause(limit)
            )
        };
        tracing::debug!("Loading top hits: {}", query);

        let rows = bind_filter!(sqlx::query_as::<_, Hit>(&query), filter)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn totals(&self, filter: &HitFilter, aggregate: bool) -> AppResult<HitTotals> {
        let conditions = where_clause(filter);

        let query = format!(
            "SELECT MAX(hit_on), COALESCE(SUM(count), 0)::BIGINT, COALESCE(MAX(count), 0)::BIGINT \
             FROM hits {}",
            conditions
        );
        let (most_recent_hit_on, total_hits, most_hits) = bind_filter!(
            sqlx::query_as::<_, (Option<NaiveDate>, i64, i64)>(&query),
            filter
        )
        .fetch_one(&self.pool)
        .await?;

        let most_hits = if aggregate {
            let query = format!(
                "SELECT COALESCE(MAX(total), 0)::BIGINT FROM \
                 (SELECT SUM(count) AS total FROM hits {} GROUP BY {}) AS grouped",
                conditions, GROUP_COLUMNS
            );
            bind_filter!(sqlx::query_scalar::<_, i64>(&query), filter)
                .fetch_one(&self.pool)
                .await?
        } else {
            most_hits
        };

        let query = format!(
            "SELECT http_status, SUM(count)::BIGINT FROM hits {} GROUP BY http_status",
            conditions
        );
        let counts_by_status: BTreeMap<String, i64> =
            bind_filter!(sqlx::query_as::<_, (String, i64)>(&query), filter)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();

        Ok(HitTotals {
            most_recent_hit_on,
            total_hits,
            most_hits,
            counts_by_status,
        })
    }

    async fn delete_all(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM hits").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn find_or_create_host(&self, hostname: &str) -> AppResult<Host> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let host = sqlx::query_as::<_, Host>(
            r#"
            INSERT INTO hosts (hostname) VALUES ($1)
            ON CONFLICT (hostname) DO UPDATE SET hostname = EXCLUDED.hostname
            RETURNING id, hostname, created_at
            "#,
        )
        .bind(hostname)
        .fetch_one(&self.pool)
        .await?;
        Ok(host)
    }

    async fn host_exists(&self, host_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM hosts WHERE id = $1)")
            .bind(host_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}
