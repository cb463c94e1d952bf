//! Hits service: validation on the write path, reporting on the read path

use chrono::{NaiveDate, Utc};
use validator::ValidationErrors;

use crate::{
    error::{AppError, AppResult},
    models::{
        hit::{field_error, leave_uniqueness_check_to_db, unknown_host_errors, MAX_COUNT},
        hit_scope::ALL_STATUSES,
        CreateHit, Hit, HitFilter, HitQuery, HitScope, HitsSummary, Host, NewHit,
    },
    repository::Repository,
};

/// `date` query value selecting the most recent day of the scope
pub const MOST_RECENT: &str = "most_recent";

#[derive(Clone)]
pub struct HitsService {
    repository: Repository,
}

impl HitsService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Normalize and validate a hit: its host must exist, and
    /// (host, path_hash, http_status, hit_on) must be unique unless that
    /// check is left to the store.
    pub async fn prepare(&self, data: &CreateHit) -> AppResult<NewHit> {
        let hit = data.normalize()?;

        if !self.repository.hits.host_exists(hit.host_id).await? {
            return Err(AppError::Invalid(unknown_host_errors()));
        }

        if !leave_uniqueness_check_to_db() && self.repository.hits.exists(&hit.key()).await? {
            let mut errors = ValidationErrors::new();
            errors.add("hit_on", field_error("taken", "has already been taken"));
            return Err(AppError::Invalid(errors));
        }

        Ok(hit)
    }

    /// Validate and persist a hit
    pub async fn create(&self, data: &CreateHit) -> AppResult<Hit> {
        let new_hit = self.prepare(data).await?;
        let hit = self.repository.hits.insert(&new_hit).await?;
        tracing::info!(
            id = ?hit.id,
            path = %hit.path,
            status = %hit.http_status,
            hit_on = %hit.hit_on,
            "Hit recorded"
        );
        Ok(hit)
    }

    /// Add requests to an existing hit. The resulting count may not exceed
    /// [`MAX_COUNT`].
    pub async fn increment(&self, id: i64, by: i64) -> AppResult<Hit> {
        if by <= 0 {
            return Err(AppError::Validation("Increment must be greater than 0".to_string()));
        }
        if by > MAX_COUNT {
            return Err(AppError::Validation(format!(
                "Increment must be less than or equal to {}",
                MAX_COUNT
            )));
        }
        self.repository.hits.increment_count(id, by).await
    }

    /// Remove every hit
    pub async fn delete_all(&self) -> AppResult<u64> {
        let deleted = self.repository.hits.delete_all().await?;
        tracing::info!("Deleted {} hits", deleted);
        Ok(deleted)
    }

    pub async fn find_or_create_host(&self, hostname: &str) -> AppResult<Host> {
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return Err(AppError::Validation("Hostname cannot be empty".to_string()));
        }
        self.repository.hits.find_or_create_host(hostname).await
    }

    /// Load a scope from the store
    pub async fn scope(&self, filter: &HitFilter) -> AppResult<HitScope> {
        let hits = self.repository.hits.list(filter).await?;
        tracing::debug!("Loaded {} hits for {:?}", hits.len(), filter);
        Ok(HitScope::new(hits))
    }

    /// Store filter for the query: host, period, status, category and
    /// zero-status filtering. Day selection is added by [`Self::list`].
    fn filter(query: &HitQuery) -> AppResult<HitFilter> {
        Ok(HitFilter {
            host_id: query.host_id,
            start_date: parse_date("start_date", query.start_date.as_deref())?,
            end_date: parse_date("end_date", query.end_date.as_deref())?,
            http_status: query
                .status
                .clone()
                .filter(|status| status != ALL_STATUSES),
            statuses: query
                .category
                .and_then(|category| category.statuses())
                .map(|statuses| statuses.iter().map(|s| s.to_string()).collect()),
            hit_on: None,
            exclude_zero_status: query.exclude_zero.unwrap_or(false),
        })
    }

    /// Hits for a report listing, in count order
    pub async fn list(&self, query: &HitQuery) -> AppResult<Vec<Hit>> {
        let mut filter = Self::filter(query)?;

        match query.date.as_deref() {
            None => {}
            Some(MOST_RECENT) => {
                let day = self.repository.hits.most_recent_hit_on(&filter).await?;
                filter.hit_on = Some(day.unwrap_or_else(|| Utc::now().date_naive()));
            }
            Some(date) => filter.hit_on = parse_date("date", Some(date))?,
        }

        let hits = self
            .repository
            .hits
            .top_hits(&filter, query.aggregate.unwrap_or(false), query.limit)
            .await?;
        tracing::debug!("Listed {} hits for {:?}", hits.len(), filter);
        Ok(hits)
    }

    /// Summary statistics for a report. An empty period reports its end
    /// date as the most recent day.
    pub async fn summary(&self, query: &HitQuery) -> AppResult<HitsSummary> {
        let filter = Self::filter(query)?;
        let totals = self
            .repository
            .hits
            .totals(&filter, query.aggregate.unwrap_or(false))
            .await?;
        Ok(totals.into_summary(filter.end_date))
    }
}

fn parse_date(field: &str, value: Option<&str>) -> AppResult<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| AppError::BadRequest(format!("Invalid {} format, expected YYYY-MM-DD", field)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HitCategory;
    use crate::repository::MockHitStore;
    use serde_json::json;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    /// Service over an in-memory store with hosts 1 and 2
    async fn service() -> HitsService {
        let service = HitsService::new(Repository::in_memory());
        service.find_or_create_host("www.example.gov").await.unwrap();
        service.find_or_create_host("aka.example.gov").await.unwrap();
        service
    }

    async fn seed(service: &HitsService) {
        let rows = [
            (1, "/a", "301", 10, day(1)),
            (2, "/a", "301", 2, day(1)),
            (1, "/a", "404", 22, day(1)),
            (1, "/b", "301", 40, day(1)),
            (2, "/b", "301", 4, day(1)),
            (2, "/a", "301", 88, day(2)),
            (1, "/z", "000", 500, day(2)),
        ];
        for (host, path, status, count, hit_on) in rows {
            service
                .create(&CreateHit::new(host, path, status, count, hit_on))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_create_normalizes() {
        let service = service().await;
        let data = CreateHit {
            hit_on: Some("2024-06-03 17:30:00".into()),
            ..CreateHit::new(1, "/normalized", "200", 5, day(1))
        };

        let hit = service.create(&data).await.unwrap();
        assert_eq!(hit.hit_on, day(3));
        assert_eq!(hit.path_hash, crate::models::hit::path_hash("/normalized"));
        assert!(hit.id.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_is_a_validation_error() {
        let service = service().await;
        let data = CreateHit::new(1, "/dup", "301", 1, day(1));
        service.create(&data).await.unwrap();

        match service.create(&data).await {
            Err(AppError::Invalid(errors)) => {
                assert!(errors.field_errors().contains_key("hit_on"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        // Same tuple on another day is fine
        service
            .create(&CreateHit::new(1, "/dup", "301", 1, day(2)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_hit_is_not_persisted() {
        let service = service().await;
        let data = CreateHit {
            count: Some(json!("one")),
            ..CreateHit::new(1, "/bad", "200", 1, day(1))
        };
        assert!(matches!(service.create(&data).await, Err(AppError::Invalid(_))));

        let stored = service.scope(&HitFilter::default()).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_existing_key_skips_insert() {
        let mut store = MockHitStore::new();
        store.expect_host_exists().returning(|_| Ok(true));
        store.expect_exists().times(1).returning(|_| Ok(true));
        store.expect_insert().times(0);

        let service = HitsService::new(Repository::with_store(Arc::new(store)));
        let result = service
            .create(&CreateHit::new(1, "/a", "200", 1, day(1)))
            .await;
        assert!(matches!(result, Err(AppError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let mut store = MockHitStore::new();
        store.expect_host_exists().returning(|_| Ok(true));
        store.expect_exists().returning(|_| Ok(false));
        store
            .expect_insert()
            .withf(|hit: &NewHit| hit.path == "/a" && hit.hit_on == day(1))
            .returning(|_| Err(AppError::Conflict("duplicate".into())));

        let service = HitsService::new(Repository::with_store(Arc::new(store)));
        let result = service
            .create(&CreateHit::new(1, "/a", "200", 1, day(1)))
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_increment() {
        let service = service().await;
        let hit = service
            .create(&CreateHit::new(1, "/inc", "200", 1, day(1)))
            .await
            .unwrap();
        let id = hit.id.unwrap();

        assert_eq!(service.increment(id, 2).await.unwrap().count, 3);
        assert!(matches!(service.increment(id, 0).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_increment_near_maximum_count() {
        let service = service().await;
        let hit = service
            .create(&CreateHit::new(1, "/busy", "200", MAX_COUNT - 1, day(1)))
            .await
            .unwrap();
        let id = hit.id.unwrap();

        assert!(matches!(service.increment(id, i64::MAX).await, Err(AppError::Validation(_))));
        assert!(matches!(service.increment(id, 2).await, Err(AppError::Validation(_))));
        assert_eq!(service.increment(id, 1).await.unwrap().count, MAX_COUNT);
    }

    #[tokio::test]
    async fn test_unknown_host_is_a_validation_error() {
        let service = service().await;
        match service.create(&CreateHit::new(999, "/a", "200", 1, day(1))).await {
            Err(AppError::Invalid(errors)) => {
                assert!(errors.field_errors().contains_key("host_id"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(service.scope(&HitFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_host_skips_lookup_and_insert() {
        let mut store = MockHitStore::new();
        store.expect_host_exists().withf(|id: &i32| *id == 999).returning(|_| Ok(false));
        store.expect_exists().times(0);
        store.expect_insert().times(0);

        let service = HitsService::new(Repository::with_store(Arc::new(store)));
        let result = service
            .create(&CreateHit::new(999, "/a", "200", 1, day(1)))
            .await;
        assert!(matches!(result, Err(AppError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_reports_match_scope_operations() {
        let service = service().await;
        seed(&service).await;
        let everything = service.scope(&HitFilter::default()).await.unwrap();

        for aggregate in [false, true] {
            for exclude_zero in [false, true] {
                for category in [None, Some(HitCategory::Redirects)] {
                    let query = HitQuery {
                        aggregate: Some(aggregate),
                        exclude_zero: Some(exclude_zero),
                        category,
                        date: Some(MOST_RECENT.into()),
                        ..Default::default()
                    };

                    let mut scope = everything.clone();
                    if let Some(category) = category {
                        scope = scope.in_category(category);
                    }
                    if exclude_zero {
                        scope = scope.without_zero_status_hits();
                    }
                    assert_eq!(
                        service.summary(&query).await.unwrap(),
                        scope.summary(None, aggregate),
                        "summary for {:?}",
                        query
                    );

                    let mut expected = scope.most_recent_hits(None);
                    if aggregate {
                        expected = expected.aggregated();
                    }
                    assert_eq!(
                        service.list(&query).await.unwrap(),
                        expected.in_count_order().into_hits(),
                        "listing for {:?}",
                        query
                    );
                }
            }
        }

        let limited = HitQuery {
            aggregate: Some(true),
            host_id: Some(2),
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(
            service.list(&limited).await.unwrap(),
            everything.clone().for_host(2).aggregated().in_count_order().take(2).into_hits()
        );
    }

    #[tokio::test]
    async fn test_list_most_recent_aggregated() {
        let service = service().await;
        seed(&service).await;

        let query = HitQuery {
            date: Some(MOST_RECENT.into()),
            exclude_zero: Some(true),
            aggregate: Some(true),
            ..Default::default()
        };
        let hits = service.list(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].count, 88);

        let query = HitQuery {
            date: Some("2024-06-01".into()),
            aggregate: Some(true),
            limit: Some(2),
            ..Default::default()
        };
        let counts: Vec<i64> = service.list(&query).await.unwrap().iter().map(|h| h.count).collect();
        assert_eq!(counts, vec![44, 22]);
    }

    #[tokio::test]
    async fn test_list_by_status_and_category() {
        let service = service().await;
        seed(&service).await;

        let query = HitQuery {
            status: Some("404".into()),
            ..Default::default()
        };
        assert_eq!(service.list(&query).await.unwrap().len(), 1);

        let query = HitQuery {
            category: Some(HitCategory::Redirects),
            host_id: Some(2),
            ..Default::default()
        };
        assert_eq!(service.list(&query).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_summary() {
        let service = service().await;
        seed(&service).await;

        let query = HitQuery {
            exclude_zero: Some(true),
            aggregate: Some(true),
            ..Default::default()
        };
        let summary = service.summary(&query).await.unwrap();
        assert_eq!(summary.most_recent_hit_on, day(2));
        assert_eq!(summary.total_hits, 166);
        assert_eq!(summary.most_hits, 88);
        assert_eq!(summary.counts_by_status.get("301"), Some(&144));

        let empty = HitQuery {
            start_date: Some("2023-01-01".into()),
            end_date: Some("2023-01-31".into()),
            ..Default::default()
        };
        let summary = service.summary(&empty).await.unwrap();
        assert_eq!(summary.most_recent_hit_on, NaiveDate::from_ymd_opt(2023, 1, 31).unwrap());
        assert_eq!(summary.total_hits, 0);
        assert!(summary.counts_by_status.is_empty());
    }

    #[tokio::test]
    async fn test_bad_date_parameter() {
        let service = service().await;
        let query = HitQuery {
            start_date: Some("last week".into()),
            ..Default::default()
        };
        assert!(matches!(service.list(&query).await, Err(AppError::BadRequest(_))));
    }
}
