//! Error types for HTTPDNS operations

use thiserror::Error;

/// Result type alias for HTTPDNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during HTTPDNS operations
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error, surfaced only from client construction
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Domain name is empty or longer than 253 bytes
    #[error("invalid domain name")]
    InvalidDomain,

    /// Batch resolve was given more than 5 domains
    #[error("too many domains, maximum 5 domains allowed per batch request")]
    TooManyDomains,

    /// The client has been closed
    #[error("service unavailable")]
    ServiceUnavailable,

    /// The service IP pool is empty
    #[error("no service IPs available")]
    NoServiceIps,

    /// Every bootstrap IP and the fallback domain failed to yield service IPs
    #[error("failed to fetch service IPs from all bootstrap IPs and fallback domain")]
    BootstrapExhausted,

    /// All retry attempts failed; carries the last attempt's error
    #[error("request failed after all retry attempts")]
    RequestRetryFailed(#[source] Box<Error>),

    /// Server answered with a non-2xx status
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// Response body could not be parsed as JSON
    #[error("failed to parse response")]
    ParseFailed(#[from] serde_json::Error),

    /// The caller's deadline elapsed before the operation completed
    #[error("operation cancelled")]
    Cancelled,

    /// HTTP transport failure
    #[error("transport error")]
    Transport(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Wrapper carrying the failing operation and, when known, the domain
    #[error("httpdns {}", operation_target(.op, .domain))]
    Resolve {
        op: &'static str,
        domain: Option<String>,
        #[source]
        source: Box<Error>,
    },
}

fn operation_target(op: &str, domain: &Option<String>) -> String {
    match domain {
        Some(domain) => format!("{op} {domain}"),
        None => op.to_string(),
    }
}

impl Error {
    /// Wrap an error with the operation name and, when known, the domain
    pub(crate) fn resolve(op: &'static str, domain: Option<&str>, source: Error) -> Self {
        Error::Resolve {
            op,
            domain: domain.map(str::to_string),
            source: Box::new(source),
        }
    }

    /// Check if this error originated in the network layer
    pub fn is_network_error(&self) -> bool {
        match self {
            Error::Transport(_) | Error::HttpStatus(_) | Error::RequestRetryFailed(_) => true,
            Error::Resolve { source, .. } => source.is_network_error(),
            _ => false,
        }
    }

    /// Check if this error is the caller's deadline elapsing
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Resolve { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
