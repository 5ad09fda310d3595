mod error;
mod handlers;
pub mod http;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Reply, Request, StateOptions};
