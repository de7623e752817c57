//! Vision gateway - operator console bridge to the line PLC
//!
//! The gateway sits between the browser console of the vision inspection
//! station and the line controller. Its core keeps one ISO-on-TCP session to
//! the controller alive and writes the machine stop bit on the console's
//! request, one write at a time.
//!
//! ## Services
//!
//! - **PLC link**: supervised controller session with fixed-delay reconnection
//! - **Command gate**: serialized, fail-fast stop-bit writes
//! - **Console**: static files, cookie login, alarm and audit endpoints
//! - **Audit**: daily semicolon-delimited CSV files
//! - **Camera**: relay of an external capture process as a multipart stream

pub mod auth;
pub mod config;
pub mod logging;
pub mod plc;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{GatewayError, Result};
