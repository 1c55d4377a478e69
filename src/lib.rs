pub mod app;
pub mod auth;
pub mod chat;
pub mod cli;
pub mod error;

pub use error::{Error, Result};
