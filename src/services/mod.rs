//! Business logic services

pub mod hits;

use crate::repository::Repository;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub hits: hits::HitsService,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(repository: Repository) -> Self {
        Self {
            hits: hits::HitsService::new(repository),
        }
    }
}
