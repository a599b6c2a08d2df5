//! HTTP API handlers for sked-import
//!
//! Read-only surface: health, the import event stream and job progress.

pub mod health;
pub mod progress;
pub mod sse;

pub use health::health_routes;
pub use progress::progress_routes;
pub use sse::import_event_stream;
