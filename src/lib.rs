pub mod auth;
pub mod backend;
pub mod client;
pub mod config;
pub mod display_config;
pub mod errors;
mod handlers;
pub mod input;
pub mod output;
pub mod policy;
pub mod render;
pub mod shell;
pub mod snap;
pub mod state;
pub mod watcher;

pub use errors::{CompositorError, Result};
pub use state::Frame;
