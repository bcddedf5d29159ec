//! Configuration, errors and shared types

pub mod auth;
pub mod config;
pub mod errors;
pub mod models;
pub mod process;
