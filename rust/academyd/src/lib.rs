pub mod api;
pub mod attendance;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod ids;
pub mod logging;
pub mod notify;
pub mod relations;
pub mod storage;
pub mod validate;
