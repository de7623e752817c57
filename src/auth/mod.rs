//! Console authentication
//!
//! Provides:
//! - Argon2 hashing of the configured console password
//! - Cookie-based session gate in front of non-public paths

pub mod password;
pub mod session;

pub use password::{hash_password, verify_password, ConsoleCredentials};
pub use session::{clear_session_cookie, has_session, is_public_path, session_cookie, PUBLIC_PATHS};
