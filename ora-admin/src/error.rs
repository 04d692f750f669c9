use snafu::Snafu;

/// All errors returned when an administrative session fails to run.
///
/// Statement-level failures (ORA- errors) are not errors at this layer:
/// the administration tool reports them as output lines, and callers
/// interpret those lines.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AdminError {
    /// Error when the administration tool cannot be spawned.
    #[snafu(display("Failed to spawn {program}. Error {source}"))]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// Error when statements cannot be streamed into the session.
    #[snafu(display("Failed to stream statements to {program}. Error {source}"))]
    Stream {
        program: String,
        source: std::io::Error,
    },
    /// Error when the session output cannot be collected.
    #[snafu(display("Failed to collect output from {program}. Error {source}"))]
    Collect {
        program: String,
        source: std::io::Error,
    },
    /// Error when the remote transport itself failed (the command never ran).
    #[snafu(display("Remote session to {user}@{host} failed with {status}: {detail}"))]
    Transport {
        host: String,
        user: String,
        status: String,
        detail: String,
    },
}
