use std::time::Duration;

use crate::{
    config::Settings,
    db::agsi::gas_storage_archive::GasStorageArchive,
    error::GasStorageError,
    utils::lib_duckdb::manager_with_retry,
};

const POOL_SIZE: u32 = 8;

pub struct ProdDb {}

impl ProdDb {
    /// The gas storage table at `DUCKDB_PATH`, migrated to the current schema.
    pub fn gas_storage(settings: &Settings) -> Result<GasStorageArchive, GasStorageError> {
        let manager = manager_with_retry(&settings.duckdb_path, 8, Duration::from_millis(25))?;
        let pool = r2d2::Pool::builder().max_size(POOL_SIZE).build(manager)?;
        GasStorageArchive::new(pool)
    }
}
