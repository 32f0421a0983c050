//! Adaptive ranking for shortcut tiles.
//!
//! `ShortcutRanker` blends Thompson-sampled click-through, frecency and
//! hour/weekday seasonality through a linear model whose weights are updated
//! online from each pass's interactions and persisted per profile.

pub mod cache;
pub mod compute;
pub mod config;
pub mod error;
pub mod history;
pub mod ranker;
pub mod seasonality;
pub mod types;
pub mod weights;

#[cfg(test)]
mod test_support;

pub use cache::{CacheStore, JsonFileCache, MemoryCache};
pub use compute::{ComputeService, LocalCompute};
pub use config::{load_config, ProfilePaths, RankerConfig};
pub use error::RankError;
pub use history::{InteractionAggregator, InteractionSource, QueryExecutor, SqliteExecutor};
pub use ranker::{frecency_order, ShortcutRanker};
pub use types::{Feature, FeatureSet, RankableItem};
