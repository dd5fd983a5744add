pub mod cache;
pub mod config;
pub mod engine;
pub mod execution;
pub mod expr;
pub mod metadata;
pub mod query;
pub mod rewrite;
pub mod scalar;
pub mod shaper;
pub mod sqlgen;
pub mod testutil;
pub mod translate;
pub mod types;
