//! Composable queries and aggregations over a snapshot of hits
//!
//! A [`HitScope`] is loaded once from the store and then narrowed, grouped
//! and sorted in memory. Filtering operations consume the scope and return
//! a new one so they chain:
//!
//! ```ignore
//! let top = scope.without_zero_status_hits().aggregated().in_count_order();
//! ```
//!
//! Operations taking `from_aggregate` behave as if the scope had first been
//! passed through [`HitScope::aggregated`]. Aggregation is idempotent, so the
//! flag is safe to set on a scope that is already aggregated.
//!
//! Sums saturate at `i64::MAX`. Stored rows are bounded by
//! [`MAX_COUNT`](crate::models::hit::MAX_COUNT), so that limit is never
//! reached from store data.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::Serialize;

use super::hit::{Hit, HitCategory, HitsSummary};

/// Status value that disables status filtering
pub const ALL_STATUSES: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HitScope {
    hits: Vec<Hit>,
}

impl HitScope {
    pub fn new(hits: Vec<Hit>) -> Self {
        Self { hits }
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn into_hits(self) -> Vec<Hit> {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Hit> {
        self.hits.iter()
    }

    fn retain(mut self, keep: impl FnMut(&Hit) -> bool) -> Self {
        self.hits.retain(keep);
        self
    }

    /// Rows the `from_aggregate` variants operate on
    fn view(&self, from_aggregate: bool) -> Cow<'_, [Hit]> {
        if from_aggregate {
            Cow::Owned(self.clone().aggregated().hits)
        } else {
            Cow::Borrowed(&self.hits)
        }
    }

    /// Drop hits whose status is only zeros ("0", "00", "000").
    /// "01", "001" and "100" are kept.
    pub fn without_zero_status_hits(self) -> Self {
        self.retain(|hit| !hit.has_zero_status())
    }

    /// Count descending, then status ascending, path ascending and most
    /// recent day first.
    pub fn in_count_order(mut self) -> Self {
        self.hits.sort_by(count_order);
        self
    }

    /// Collapse hits sharing path, status and day across hosts, summing
    /// their counts. Groups keep the order in which they first appear.
    pub fn aggregated(self) -> Self {
        let mut groups: IndexMap<(String, String, NaiveDate), Hit> =
            IndexMap::with_capacity(self.hits.len());

        for hit in self.hits {
            match groups.entry((hit.path.clone(), hit.http_status.clone(), hit.hit_on)) {
                Entry::Occupied(mut group) => {
                    let count = &mut group.get_mut().count;
                    *count = count.saturating_add(hit.count);
                }
                Entry::Vacant(group) => {
                    group.insert(Hit {
                        id: None,
                        host_id: None,
                        created_at: None,
                        updated_at: None,
                        ..hit
                    });
                }
            }
        }

        Self {
            hits: groups.into_values().collect(),
        }
    }

    /// Latest `hit_on` in the scope, or `fallback` (today when not given)
    /// for an empty scope.
    pub fn most_recent_hit_on_date(
        &self,
        fallback: Option<NaiveDate>,
        from_aggregate: bool,
    ) -> NaiveDate {
        self.view(from_aggregate)
            .iter()
            .map(|hit| hit.hit_on)
            .max()
            .or(fallback)
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Hits on `date`, or on the most recent day of the scope.
    pub fn most_recent_hits(self, date: Option<NaiveDate>) -> Self {
        let date = date.unwrap_or_else(|| self.most_recent_hit_on_date(None, false));
        self.retain(|hit| hit.hit_on == date)
    }

    /// Hits with exactly this status; `"all"` keeps everything.
    pub fn with_status(self, status: &str) -> Self {
        if status == ALL_STATUSES {
            return self;
        }
        self.retain(|hit| hit.http_status == status)
    }

    pub fn in_category(self, category: HitCategory) -> Self {
        match category.statuses() {
            None => self,
            Some(statuses) => self.retain(|hit| statuses.contains(&hit.http_status.as_str())),
        }
    }

    /// Inclusive date range; open ends are unbounded.
    pub fn between(self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.retain(|hit| {
            start.map_or(true, |start| hit.hit_on >= start)
                && end.map_or(true, |end| hit.hit_on <= end)
        })
    }

    pub fn for_host(self, host_id: i32) -> Self {
        self.retain(|hit| hit.host_id == Some(host_id))
    }

    pub fn take(mut self, limit: usize) -> Self {
        self.hits.truncate(limit);
        self
    }

    /// Largest single count, 0 when empty.
    pub fn most_hits(&self, from_aggregate: bool) -> i64 {
        self.view(from_aggregate)
            .iter()
            .map(|hit| hit.count)
            .max()
            .unwrap_or(0)
    }

    /// Sum of counts, 0 when empty.
    pub fn total_hits(&self, from_aggregate: bool) -> i64 {
        self.view(from_aggregate)
            .iter()
            .fold(0i64, |total, hit| total.saturating_add(hit.count))
    }

    /// Summed counts per status.
    pub fn counts_by_status(&self, from_aggregate: bool) -> BTreeMap<String, i64> {
        let mut counts = BTreeMap::new();
        for hit in self.view(from_aggregate).iter() {
            let count = counts.entry(hit.http_status.clone()).or_insert(0i64);
            *count = count.saturating_add(hit.count);
        }
        counts
    }

    pub fn summary(&self, fallback: Option<NaiveDate>, from_aggregate: bool) -> HitsSummary {
        HitsSummary {
            most_recent_hit_on: self.most_recent_hit_on_date(fallback, from_aggregate),
            total_hits: self.total_hits(from_aggregate),
            most_hits: self.most_hits(from_aggregate),
            counts_by_status: self.counts_by_status(from_aggregate),
        }
    }
}

/// Ordering used by [`HitScope::in_count_order`] and by stores returning
/// hits in count order.
pub fn count_order(a: &Hit, b: &Hit) -> Ordering {
    b.count
        .cmp(&a.count)
        .then_with(|| a.http_status.cmp(&b.http_status))
        .then_with(|| a.path.cmp(&b.path))
        .then_with(|| b.hit_on.cmp(&a.hit_on))
}

impl From<Vec<Hit>> for HitScope {
    fn from(hits: Vec<Hit>) -> Self {
        Self::new(hits)
    }
}

impl FromIterator<Hit> for HitScope {
    fn from_iter<I: IntoIterator<Item = Hit>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for HitScope {
    type Item = Hit;
    type IntoIter = std::vec::IntoIter<Hit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}
