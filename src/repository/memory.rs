//! In-process hit store
//!
//! Keeps hits and hosts in memory behind a `RwLock`, enforcing the same
//! unique index, host reference and count bound as the `hits` table. Used
//! by the `memory` storage backend and by tests.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;

use super::HitStore;
use crate::{
    error::{AppError, AppResult},
    models::{
        hit::{unknown_host_errors, MAX_COUNT},
        hit_scope::count_order,
        Hit, HitFilter, HitKey, HitTotals, Host, NewHit,
    },
};

#[derive(Default)]
struct MemoryState {
    hits: Vec<Hit>,
    /// Unique index over (host, path_hash, status, day)
    index: HashSet<HitKey>,
    hosts: Vec<Host>,
    next_hit_id: i64,
}

#[derive(Default)]
pub struct MemoryHitStore {
    state: RwLock<MemoryState>,
}

impl MemoryHitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn matching<'a>(&'a self, filter: &'a HitFilter) -> impl Iterator<Item = &'a Hit> + 'a {
        self.hits.iter().filter(move |hit| filter.matches(hit))
    }

    /// Matching hits summed per (path, status, day), in first-seen order
    fn grouped(&self, filter: &HitFilter) -> Vec<Hit> {
        let mut positions: HashMap<(&str, &str, NaiveDate), usize> = HashMap::new();
        let mut groups: Vec<Hit> = Vec::new();
        for hit in self.matching(filter) {
            let key = (hit.path.as_str(), hit.http_status.as_str(), hit.hit_on);
            match positions.get(&key) {
                Some(&at) => groups[at].count += hit.count,
                None => {
                    positions.insert(key, groups.len());
                    groups.push(Hit {
                        id: None,
                        host_id: None,
                        created_at: None,
                        updated_at: None,
                        ..hit.clone()
                    });
                }
            }
        }
        groups
    }
}

#[async_trait]
impl HitStore for MemoryHitStore {
    async fn exists(&self, key: &HitKey) -> AppResult<bool> {
        Ok(self.state.read().await.index.contains(key))
    }

    async fn insert(&self, hit: &NewHit) -> AppResult<Hit> {
        let mut state = self.state.write().await;
        if !state.hosts.iter().any(|host| host.id == hit.host_id) {
            tracing::warn!(host_id = hit.host_id, "Hit rejected for unknown host");
            return Err(AppError::Invalid(unknown_host_errors()));
        }
        if hit.count <= 0 || hit.count > MAX_COUNT {
            return Err(AppError::Validation(format!(
                "Count must be between 1 and {}",
                MAX_COUNT
            )));
        }
        let key = hit.key();
        if state.index.contains(&key) {
            tracing::warn!(path = %hit.path, status = %hit.http_status, "Duplicate hit rejected by unique index");
            return Err(AppError::Conflict(
                "Hit already exists for this host, path, status and date".to_string(),
            ));
        }

        state.next_hit_id += 1;
        let now = Utc::now();
        let stored = Hit {
            id: Some(state.next_hit_id),
            host_id: Some(hit.host_id),
            path: hit.path.clone(),
            path_hash: hit.path_hash.clone(),
            http_status: hit.http_status.clone(),
            count: hit.count,
            hit_on: hit.hit_on,
            created_at: Some(now),
            updated_at: Some(now),
        };
        state.hits.push(stored.clone());
        state.index.insert(key);
        Ok(stored)
    }

    async fn increment_count(&self, id: i64, by: i64) -> AppResult<Hit> {
        let mut state = self.state.write().await;
        let hit = state
            .hits
            .iter_mut()
            .find(|hit| hit.id == Some(id))
            .ok_or_else(|| AppError::NotFound(format!("Hit with id {} not found", id)))?;
        hit.count = hit
            .count
            .checked_add(by)
            .filter(|count| (1..=MAX_COUNT).contains(count))
            .ok_or_else(|| AppError::Validation(format!("Count would exceed {}", MAX_COUNT)))?;
        hit.updated_at = Some(Utc::now());
        Ok(hit.clone())
    }

    async fn list(&self, filter: &HitFilter) -> AppResult<Vec<Hit>> {
        let state = self.state.read().await;
        let mut hits: Vec<Hit> = state.matching(filter).cloned().collect();
        hits.sort_by(|a, b| b.hit_on.cmp(&a.hit_on).then_with(|| a.id.cmp(&b.id)));
        Ok(hits)
    }

    async fn most_recent_hit_on(&self, filter: &HitFilter) -> AppResult<Option<NaiveDate>> {
        let state = self.state.read().await;
        Ok(state.matching(filter).map(|hit| hit.hit_on).max())
    }

    async fn top_hits(
        &self,
        filter: &HitFilter,
        aggregate: bool,
        limit: Option<usize>,
    ) -> AppResult<Vec<Hit>> {
        let state = self.state.read().await;
        let mut hits = if aggregate {
            state.grouped(filter)
        } else {
            state.matching(filter).cloned().collect()
        };
        hits.sort_by(count_order);
        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn totals(&self, filter: &HitFilter, aggregate: bool) -> AppResult<HitTotals> {
        let state = self.state.read().await;
        let mut totals = HitTotals::default();
        let mut counts_by_status: BTreeMap<String, i64> = BTreeMap::new();

        for hit in state.matching(filter) {
            totals.most_recent_hit_on = totals.most_recent_hit_on.max(Some(hit.hit_on));
            totals.total_hits += hit.count;
            totals.most_hits = totals.most_hits.max(hit.count);
            *counts_by_status.entry(hit.http_status.clone()).or_insert(0) += hit.count;
        }
        if aggregate {
            totals.most_hits = state
                .grouped(filter)
                .iter()
                .map(|group| group.count)
                .max()
                .unwrap_or(0);
        }

        totals.counts_by_status = counts_by_status;
        Ok(totals)
    }

    async fn delete_all(&self) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let deleted = state.hits.len() as u64;
        state.hits.clear();
        state.index.clear();
        Ok(deleted)
    }

    async fn find_or_create_host(&self, hostname: &str) -> AppResult<Host> {
        let mut state = self.state.write().await;
        if let Some(host) = state.hosts.iter().find(|host| host.hostname == hostname) {
            return Ok(host.clone());
        }
        let host = Host {
            id: state.hosts.len() as i32 + 1,
            hostname: hostname.to_string(),
            created_at: Some(Utc::now()),
        };
        state.hosts.push(host.clone());
        Ok(host)
    }

    async fn host_exists(&self, host_id: i32) -> AppResult<bool> {
        let state = self.state.read().await;
        Ok(state.hosts.iter().any(|host| host.id == host_id))
    }
}
