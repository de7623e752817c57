//! Configuration for the vision gateway
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::plc::{Endpoint, RetryPolicy};
use crate::types::GatewayError;

/// Vision gateway - operator console and stop-bit bridge to the line PLC
#[derive(Parser, Debug, Clone)]
#[command(name = "vision-gateway")]
#[command(about = "Operator console gateway for the vision stop PLC")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// PLC host name or IP address (ISO-on-TCP port 102)
    #[arg(long, env = "PLC_IP", default_value = "192.168.0.1")]
    pub plc_ip: String,

    /// PLC rack number (0-7)
    #[arg(long, env = "PLC_RACK", default_value = "0")]
    pub plc_rack: u8,

    /// PLC slot number (0-31)
    #[arg(long, env = "PLC_SLOT", default_value = "1")]
    pub plc_slot: u8,

    /// Delay between controller reconnection attempts, in seconds
    #[arg(long, env = "RECONNECT_DELAY_SECS", default_value = "5")]
    pub reconnect_delay_secs: u64,

    /// Bound on each controller connect and write, in milliseconds
    #[arg(long, env = "PLC_TIMEOUT_MS", default_value = "3000")]
    pub plc_timeout_ms: u64,

    /// Console login name
    #[arg(long, env = "CONSOLE_USER", default_value = "admin")]
    pub console_user: String,

    /// Console login password (required in production)
    #[arg(long, env = "CONSOLE_PASSWORD")]
    pub console_password: Option<String>,

    /// Lifetime of the console session cookie, in seconds
    #[arg(long, env = "SESSION_MAX_AGE_SECS", default_value = "86400")]
    pub session_max_age_secs: u64,

    /// Directory receiving the daily audit CSV files
    #[arg(long, env = "LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    /// Directory holding the console's static files
    #[arg(long, env = "FRONTEND_DIR", default_value = "./frontend")]
    pub frontend_dir: PathBuf,

    /// Shell command whose stdout is a multipart MJPEG stream
    /// (e.g. "ffmpeg -f v4l2 -i /dev/video0 -f mpjpeg -")
    #[arg(long, env = "CAMERA_COMMAND")]
    pub camera_command: Option<String>,

    /// Multipart boundary emitted by the camera command
    #[arg(long, env = "CAMERA_BOUNDARY", default_value = "ffmpeg")]
    pub camera_boundary: String,

    /// Acknowledge alarm requests with OK even when the PLC write failed
    #[arg(long, env = "ACK_WRITE_FAILURES", default_value = "false")]
    pub ack_write_failures: bool,

    /// Enable development mode (simulated PLC, default console password)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Controller endpoint built from the PLC settings
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.plc_ip.clone(), self.plc_rack, self.plc_slot)
    }

    /// Fixed-delay reconnection policy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_secs(self.reconnect_delay_secs))
    }

    /// Bound applied to controller I/O
    pub fn plc_timeout(&self) -> Duration {
        Duration::from_millis(self.plc_timeout_ms)
    }

    /// Get effective console password (uses default in dev mode)
    pub fn console_password(&self) -> String {
        if self.dev_mode {
            self.console_password
                .clone()
                .unwrap_or_else(|| "dev-only-password".to_string())
        } else {
            self.console_password.clone().unwrap_or_default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.plc_ip.trim().is_empty() {
            return Err(GatewayError::Config("PLC_IP must not be empty".into()));
        }
        if self.plc_rack > 7 {
            return Err(GatewayError::Config(format!(
                "PLC_RACK must be 0-7, got {}",
                self.plc_rack
            )));
        }
        if self.plc_slot > 31 {
            return Err(GatewayError::Config(format!(
                "PLC_SLOT must be 0-31, got {}",
                self.plc_slot
            )));
        }
        if self.reconnect_delay_secs == 0 {
            return Err(GatewayError::Config(
                "RECONNECT_DELAY_SECS must be at least 1".into(),
            ));
        }
        if self.plc_timeout_ms == 0 {
            return Err(GatewayError::Config("PLC_TIMEOUT_MS must be positive".into()));
        }
        if !self.dev_mode && self.console_password.as_deref().unwrap_or("").is_empty() {
            return Err(GatewayError::Config(
                "CONSOLE_PASSWORD is required in production mode".into(),
            ));
        }
        if self.camera_boundary.is_empty() {
            return Err(GatewayError::Config("CAMERA_BOUNDARY must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["vision-gateway"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_endpoint_and_policy() {
        let args = parse(&[
            "--plc-ip",
            "10.0.0.5",
            "--plc-slot",
            "2",
            "--console-password",
            "secret",
        ]);
        let endpoint = args.endpoint();
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_eq!(endpoint.slot, 2);
        assert_eq!(endpoint.port, 102);
        assert_eq!(args.retry_policy().delay, Duration::from_secs(5));
        assert_eq!(args.plc_timeout(), Duration::from_millis(3000));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_production_requires_password() {
        let args = parse(&["--plc-ip", "10.0.0.5"]);
        if std::env::var("CONSOLE_PASSWORD").is_err() {
            assert!(args.validate().is_err());
        }
    }

    #[test]
    fn test_dev_mode_has_default_password() {
        let args = parse(&["--dev-mode"]);
        assert!(args.validate().is_ok());
        assert!(!args.console_password().is_empty());
    }

    #[test]
    fn test_rejects_out_of_range_slot() {
        let args = parse(&["--dev-mode", "--plc-slot", "40"]);
        assert!(args.validate().is_err());
    }
}
