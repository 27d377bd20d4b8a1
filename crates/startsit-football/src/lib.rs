pub mod client;
pub mod defense_cache;
pub mod prompt;
pub mod scoring;
pub mod stats;

pub use client::HttpStatsClient;
pub use defense_cache::DefenseCache;
pub use stats::{DefenseBundle, StatsBundle, StatsProvider};
