pub mod dashboard;
pub mod gas_storage;
pub mod maintenance;
