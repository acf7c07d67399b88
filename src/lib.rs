//! Client library for a billing portal: session handling, invoices and
//! payment method resolution.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod journal;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod storage;

pub use error::{PortalError, Result};
