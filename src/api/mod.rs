//! Control API: JSON over HTTP

pub mod handlers;
pub mod server;

pub use server::{AppState, ControlServer};
