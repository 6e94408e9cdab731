pub mod behavioral;
pub mod conversion;
pub mod pool;
pub mod queries;
pub mod schema;
mod values;

pub use behavioral::DuckDbBehavioralStore;
pub use conversion::DuckDbConversionStore;
pub use pool::{ConnectionPool, PoolSettings};

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `drillbit_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
