use snafu::Snafu;

/// All errors returned by the array control-plane client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ArrayError {
    /// Error when the array cannot be reached at all.
    #[snafu(display("Failed to reach array {host}. Error {source}"))]
    Request { host: String, source: reqwest::Error },
    /// Error when the array endpoint is not a valid url.
    #[snafu(display("Invalid array endpoint {endpoint}. Error {source}"))]
    Endpoint {
        endpoint: String,
        source: url::ParseError,
    },
    /// Error when the login exchange does not yield a session token.
    #[snafu(display("Array {host} login did not return a session token"))]
    Login { host: String },
    /// Error when a call returns a non-success status.
    #[snafu(display("Array call {call} failed with status {status}: {message}"))]
    Api {
        call: &'static str,
        status: u16,
        message: String,
    },
    /// Error when a response body cannot be decoded.
    #[snafu(display("Failed to decode array response for {call}. Error {source}"))]
    Decode {
        call: &'static str,
        source: reqwest::Error,
    },
}

impl ArrayError {
    /// True when the failure is the replica-side "snapshot is still being
    /// replicated" condition, worth a bounded retry by the caller.
    pub fn is_pending_replication(&self) -> bool {
        match self {
            ArrayError::Api { message, .. } => {
                message.to_ascii_lowercase().contains("replicat")
            }
            _ => false,
        }
    }
}
