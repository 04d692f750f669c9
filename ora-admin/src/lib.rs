//! Administrative command sessions against Oracle database and ASM
//! instances, local or remote.
//!
//! The instance under administration may be down or part-way through a
//! mount sequence, so everything here goes through the command-line
//! administration tool (`sqlplus -s /nolog`) rather than a live database
//! session. One [`AdminExec::run_batch`] call is one session: one connect,
//! one sequence of statements, one disconnect. Statements within a batch
//! share session context, which matters for container switches and
//! startup sequencing.

pub mod error;
mod local;
mod remote;
mod script;

pub use error::AdminError;
pub use local::LocalSession;
pub use remote::RemoteSession;

/// Capability to run administrative command batches against an instance
/// and its host.
#[async_trait::async_trait]
pub trait AdminExec: Send + Sync {
    /// Run `statements` inside a single session opened with `connect`,
    /// returning the non-empty output lines. Statement-level failures
    /// (ORA- errors) surface as output lines, not as `Err`.
    async fn run_batch(
        &self,
        connect: &str,
        statements: &[String],
    ) -> Result<Vec<String>, AdminError>;

    /// Run an operating-system command on the host that owns the instance.
    async fn run_os(&self, command: &str) -> Result<Vec<String>, AdminError>;
}
