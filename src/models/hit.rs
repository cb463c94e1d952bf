//! Hit model: one row per (host, path, status, day) with a request count

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError, ValidationErrors};

/// Maximum stored path length, in bytes
pub const MAX_PATH_LENGTH: usize = 1024;

/// Largest count a single hit row may hold. Rows are bounded to the 32-bit
/// range so that sums over any realistic scope fit in an `i64`.
pub const MAX_COUNT: i64 = i32::MAX as i64;

static LEAVE_UNIQUENESS_CHECK_TO_DB: AtomicBool = AtomicBool::new(false);

/// Whether the uniqueness of (host, path_hash, http_status, hit_on) is left
/// to the store's unique index instead of being checked before insert.
pub fn leave_uniqueness_check_to_db() -> bool {
    LEAVE_UNIQUENESS_CHECK_TO_DB.load(Ordering::SeqCst)
}

/// Set the process-wide uniqueness mode, returning the previous value.
pub fn set_leave_uniqueness_check_to_db(enabled: bool) -> bool {
    LEAVE_UNIQUENESS_CHECK_TO_DB.swap(enabled, Ordering::SeqCst)
}

/// Enables `leave_uniqueness_check_to_db` until dropped, then restores the
/// previous value.
#[must_use]
pub struct UniquenessCheckOverride {
    previous: bool,
}

impl UniquenessCheckOverride {
    pub fn new(enabled: bool) -> Self {
        Self {
            previous: set_leave_uniqueness_check_to_db(enabled),
        }
    }
}

impl Drop for UniquenessCheckOverride {
    fn drop(&mut self) {
        set_leave_uniqueness_check_to_db(self.previous);
    }
}

/// SHA-1 hex digest of a path, used by the unique index in place of the path
pub fn path_hash(path: &str) -> String {
    hex::encode(Sha1::digest(path.as_bytes()))
}

/// Hit record.
///
/// `id` and `host_id` are empty on rows produced by aggregation across hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Hit {
    pub id: Option<i64>,
    pub host_id: Option<i32>,
    pub path: String,
    pub path_hash: String,
    /// Status exactly as observed (up to 3 characters)
    pub http_status: String,
    pub count: i64,
    pub hit_on: NaiveDate,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Hit {
    /// Whether the status is made up of zeros only ("0", "00", "000")
    pub fn has_zero_status(&self) -> bool {
        !self.http_status.is_empty() && self.http_status.chars().all(|c| c == '0')
    }
}

/// Columns covered by the unique index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HitKey {
    pub host_id: i32,
    pub path_hash: String,
    pub http_status: String,
    pub hit_on: NaiveDate,
}

/// A validated and normalized hit, ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHit {
    pub host_id: i32,
    pub path: String,
    pub path_hash: String,
    pub http_status: String,
    pub count: i64,
    pub hit_on: NaiveDate,
}

impl NewHit {
    pub fn key(&self) -> HitKey {
        HitKey {
            host_id: self.host_id,
            path_hash: self.path_hash.clone(),
            http_status: self.http_status.clone(),
            hit_on: self.hit_on,
        }
    }
}

/// Create hit request, as received from ingestion
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct CreateHit {
    #[validate(required(message = "can't be blank"))]
    pub host_id: Option<i32>,
    #[validate(required(message = "can't be blank"))]
    pub path: Option<String>,
    #[validate(
        required(message = "can't be blank"),
        length(max = 3, message = "is too long (maximum is 3 characters)")
    )]
    pub http_status: Option<String>,
    /// Positive integer; integer strings are accepted
    #[validate(required(message = "can't be blank"))]
    #[schema(value_type = Object)]
    pub count: Option<serde_json::Value>,
    /// Date (YYYY-MM-DD) or timestamp; any time of day is discarded
    #[validate(required(message = "can't be blank"))]
    pub hit_on: Option<String>,
}

impl CreateHit {
    pub fn new(
        host_id: i32,
        path: impl Into<String>,
        http_status: impl Into<String>,
        count: i64,
        hit_on: NaiveDate,
    ) -> Self {
        Self {
            host_id: Some(host_id),
            path: Some(path.into()),
            http_status: Some(http_status.into()),
            count: Some(serde_json::Value::from(count)),
            hit_on: Some(hit_on.format("%Y-%m-%d").to_string()),
        }
    }

    /// Compute the path hash, normalize `hit_on` to its day and run the
    /// field validations. Uniqueness is checked by the service.
    pub fn normalize(&self) -> Result<NewHit, ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };

        if let Some(path) = &self.path {
            if path.trim().is_empty() {
                errors.add("path", field_error("required", "can't be blank"));
            } else if path.len() > MAX_PATH_LENGTH {
                errors.add(
                    "path",
                    field_error("length", "is too long (maximum is 1024 bytes)"),
                );
            }
        }
        if let Some(status) = &self.http_status {
            if status.trim().is_empty() {
                errors.add("http_status", field_error("required", "can't be blank"));
            }
        }

        let count = match self.count.as_ref().map(parse_count) {
            Some(Ok(count)) => Some(count),
            Some(Err(error)) => {
                errors.add("count", error);
                None
            }
            None => None,
        };

        let hit_on = match self.hit_on.as_deref().map(parse_hit_on) {
            Some(Some(date)) => Some(date),
            Some(None) => {
                errors.add("hit_on", field_error("date", "is not a valid date"));
                None
            }
            None => None,
        };

        match (&self.host_id, &self.path, &self.http_status, count, hit_on) {
            (Some(host_id), Some(path), Some(status), Some(count), Some(hit_on))
                if errors.is_empty() =>
            {
                Ok(NewHit {
                    host_id: *host_id,
                    path: path.clone(),
                    path_hash: path_hash(path),
                    http_status: status.clone(),
                    count,
                    hit_on,
                })
            }
            _ => Err(errors),
        }
    }
}

pub(crate) fn field_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

/// Field error reported when a hit references a host that is not stored
pub fn unknown_host_errors() -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add("host_id", field_error("exists", "does not exist"));
    errors
}

/// Parse a count the way a form value would be checked: integers and
/// integer strings only, strictly positive.
pub fn parse_count(value: &serde_json::Value) -> Result<i64, ValidationError> {
    let count = match value {
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(count) => count,
            None if n.is_u64() => {
                return Err(field_error("too_large", "is too large"));
            }
            None => return Err(field_error("not_an_integer", "must be an integer")),
        },
        serde_json::Value::String(s) => {
            let s = s.trim();
            let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                s.parse::<i64>()
                    .map_err(|_| field_error("too_large", "is too large"))?
            } else if s.parse::<f64>().is_ok() {
                return Err(field_error("not_an_integer", "must be an integer"));
            } else {
                return Err(field_error("not_a_number", "is not a number"));
            }
        }
        _ => return Err(field_error("not_a_number", "is not a number")),
    };

    if count <= 0 {
        return Err(field_error("greater_than", "must be greater than 0"));
    }
    if count > MAX_COUNT {
        return Err(field_error(
            "less_than_or_equal_to",
            "must be less than or equal to 2147483647",
        ));
    }
    Ok(count)
}

/// Parse a date or timestamp and keep only its calendar day
pub fn parse_hit_on(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.date_naive());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|timestamp| timestamp.date())
}

/// Increment request used by ingestion
#[derive(Debug, Deserialize, ToSchema)]
pub struct IncrementHit {
    pub by: i64,
}

/// Reporting categories, each a fixed set of statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HitCategory {
    #[default]
    All,
    Errors,
    Archives,
    Redirects,
}

impl HitCategory {
    /// Statuses in the category; `None` means every status
    pub fn statuses(&self) -> Option<&'static [&'static str]> {
        match self {
            HitCategory::All => None,
            HitCategory::Errors => Some(&["404"]),
            HitCategory::Archives => Some(&["410"]),
            HitCategory::Redirects => Some(&["301", "302"]),
        }
    }
}

/// Filter pushed down to the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitFilter {
    pub host_id: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub http_status: Option<String>,
    /// Any of these statuses (a category)
    pub statuses: Option<Vec<String>>,
    /// A single day
    pub hit_on: Option<NaiveDate>,
    pub exclude_zero_status: bool,
}

impl HitFilter {
    pub fn matches(&self, hit: &Hit) -> bool {
        self.host_id.map_or(true, |id| hit.host_id == Some(id))
            && self.start_date.map_or(true, |d| hit.hit_on >= d)
            && self.end_date.map_or(true, |d| hit.hit_on <= d)
            && self.hit_on.map_or(true, |d| hit.hit_on == d)
            && self
                .http_status
                .as_ref()
                .map_or(true, |s| &hit.http_status == s)
            && self
                .statuses
                .as_ref()
                .map_or(true, |list| list.contains(&hit.http_status))
            && !(self.exclude_zero_status && hit.has_zero_status())
    }
}

/// Query parameters for hit listings and summaries
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct HitQuery {
    pub host_id: Option<i32>,
    /// Exact status, or `all`
    pub status: Option<String>,
    pub category: Option<HitCategory>,
    /// Start date (YYYY-MM-DD)
    pub start_date: Option<String>,
    /// End date (YYYY-MM-DD)
    pub end_date: Option<String>,
    /// `most_recent` or a date (YYYY-MM-DD)
    pub date: Option<String>,
    /// Sum counts across hosts
    pub aggregate: Option<bool>,
    /// Drop hits whose status is all zeros
    pub exclude_zero: Option<bool>,
    pub limit: Option<usize>,
}

/// Totals computed by the store over a filtered scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitTotals {
    pub most_recent_hit_on: Option<NaiveDate>,
    pub total_hits: i64,
    pub most_hits: i64,
    pub counts_by_status: BTreeMap<String, i64>,
}

impl HitTotals {
    /// An empty scope reports `fallback`, or today, as its most recent day
    pub fn into_summary(self, fallback: Option<NaiveDate>) -> HitsSummary {
        HitsSummary {
            most_recent_hit_on: self
                .most_recent_hit_on
                .or(fallback)
                .unwrap_or_else(|| Utc::now().date_naive()),
            total_hits: self.total_hits,
            most_hits: self.most_hits,
            counts_by_status: self.counts_by_status,
        }
    }
}

/// Summary statistics over a scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct HitsSummary {
    pub most_recent_hit_on: NaiveDate,
    pub total_hits: i64,
    pub most_hits: i64,
    #[schema(value_type = Object)]
    pub counts_by_status: BTreeMap<String, i64>,
}
