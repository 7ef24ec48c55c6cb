pub mod agsi;
pub mod prod_db;
