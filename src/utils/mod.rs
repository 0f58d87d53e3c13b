//! The `utils` module holds the pieces shared by every other module: the
//! error types and the tracing setup.

pub mod error;
pub mod logging;
