pub mod api;
pub mod commentary;
pub mod config;
pub mod db;
pub mod error;
pub mod utils;
