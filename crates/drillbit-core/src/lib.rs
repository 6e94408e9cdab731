pub mod attribution;
pub mod catalog;
pub mod config;
pub mod detail;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod filter;
pub mod normalize;
pub mod report;
pub mod sql;
pub mod store;

pub use engine::ReportEngine;
pub use error::{EngineError, EngineResult, StoreKind};
