pub mod agsi_client;
pub mod comments;
pub mod deltas;
pub mod export;
pub mod gas_storage_archive;
pub mod history;
pub mod ingest;
pub mod schema;
