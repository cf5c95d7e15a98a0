//! Command-line and environment settings.
//!
//! Every flag can also come from a `CHATDASH_*` environment variable; `.env`
//! is loaded before parsing.

use crate::client::{
    ClientConfig, DEFAULT_API_URL, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use crate::session::SessionStore;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, clap::Args)]
pub struct Settings {
    /// Base URL of the analytics/chat API
    #[arg(long, env = "CHATDASH_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// Request timeout in seconds; a streamed reply may run longer as long as data keeps arriving
    #[arg(
        long,
        env = "CHATDASH_REQUEST_TIMEOUT_SECS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS,
        global = true
    )]
    pub request_timeout_secs: u64,

    #[arg(
        long,
        env = "CHATDASH_CONNECT_TIMEOUT_SECS",
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        global = true
    )]
    pub connect_timeout_secs: u64,

    /// Where the chat session id is kept
    #[arg(long, env = "CHATDASH_SESSION_FILE", global = true)]
    pub session_file: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "CHATDASH_LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "CHATDASH_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

impl Settings {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn session_store(&self) -> SessionStore {
        match &self.session_file {
            Some(path) => SessionStore::new(path),
            None => SessionStore::default_location(),
        }
    }

    /// Log destination; full-screen views never log to the terminal.
    pub fn log_file_for(&self, interactive: bool) -> Option<PathBuf> {
        if self.log_file.is_some() || !interactive {
            return self.log_file.clone();
        }
        Some(match dirs::data_local_dir() {
            Some(dir) => dir.join("chatdash").join("chatdash.log"),
            None => PathBuf::from("chatdash.log"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "chatdash",
            "--api-url",
            "http://api.test:9000/",
            "--request-timeout-secs",
            "5",
            "--session-file",
            "/tmp/sid",
            "--log-file",
            "/tmp/chatdash.log",
        ])
        .unwrap();

        let config = cli.settings.client_config();
        assert_eq!(config.base_url, "http://api.test:9000/");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(
            cli.settings.session_store().path(),
            std::path::Path::new("/tmp/sid")
        );
        assert_eq!(
            cli.settings.log_file_for(true),
            Some(PathBuf::from("/tmp/chatdash.log"))
        );
    }

    #[test]
    fn interactive_modes_always_log_to_a_file() {
        let cli = TestCli::try_parse_from(["chatdash"]).unwrap();
        let mut settings = cli.settings;
        settings.log_file = None;

        assert!(settings.log_file_for(false).is_none());
        assert!(settings.log_file_for(true).is_some());
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let result = TestCli::try_parse_from(["chatdash", "--connect-timeout-secs", "soon"]);
        assert!(result.is_err());
    }
}
