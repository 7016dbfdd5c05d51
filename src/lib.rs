// Public API for integration tests and potential library usage

pub mod catalog;
pub mod config;
pub mod identity;
pub mod protocol;
pub mod session;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;
