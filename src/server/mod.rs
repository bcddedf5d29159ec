//! Model server

pub mod api;
pub mod probe;

pub use api::{router, run_server, serve};
