//! HTTP surface of the charging service

mod rest;
mod webhook;

pub use rest::{create_router, ApiError, AppState};
#[cfg(test)]
pub use webhook::{sign, SIGNATURE_HEADER};
