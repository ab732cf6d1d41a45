pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod hub;
pub mod poll;
pub mod protocol;
pub mod sign;
pub mod transport;

pub use error::{AppError, Result};
