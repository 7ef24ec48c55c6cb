pub mod calendar;
pub mod format;
pub mod lib_duckdb;
pub mod ttl_cache;
