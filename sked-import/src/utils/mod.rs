//! Utility modules for sked-import

pub mod db_retry;
pub mod value_parsing;

pub use db_retry::retry_on_lock;
