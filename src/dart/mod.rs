//! OpenDART (Korean electronic disclosure) access.

pub mod client;
pub mod corp_code;

pub use client::{DartClient, DartConfig, RetryPolicy};
