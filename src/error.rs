use reqwest::StatusCode;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{context}: {status}")]
    Status {
        context: &'static str,
        status: StatusCode,
    },

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid API URL: {0}")]
    Url(String),

    /// The backend reported an error inside the reply stream.
    #[error("{0}")]
    Reply(String),

    #[error("failed to write reply: {0}")]
    Output(#[from] std::io::Error),

    #[error("session file {}: {source}", path.display())]
    Session {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Renders an error with its `source()` chain, e.g.
/// "error decoding response body: operation timed out".
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !text.is_empty() && !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
