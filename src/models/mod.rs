//! Data models for Hitstats

pub mod hit;
pub mod hit_scope;
pub mod host;

// Re-export commonly used types
pub use hit::{
    CreateHit, Hit, HitCategory, HitFilter, HitKey, HitQuery, HitTotals, HitsSummary, NewHit,
};
pub use hit_scope::HitScope;
pub use host::Host;
