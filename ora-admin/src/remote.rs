use crate::{
    error::{AdminError, CollectSnafu, SpawnSnafu, StreamSnafu, TransportSnafu},
    script::{clean_lines, session_script},
    AdminExec,
};
use snafu::ResultExt;
use std::process::Stdio;
use tokio::{io::AsyncWriteExt, process::Command};

/// Drives the same administrative pipe as [`crate::LocalSession`], but on a
/// remote host over an `ssh` subprocess. Authentication comes from the ssh
/// key/agent configuration of the invoking user.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    host: String,
    port: u16,
    user: String,
    sid: String,
    home: String,
    /// Sourced before anything else runs on the remote side,
    /// e.g. `. ~/.profile`.
    preamble: Option<String>,
}

impl RemoteSession {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        sid: impl Into<String>,
        home: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            sid: sid.into(),
            home: home.into(),
            preamble: None,
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    fn ssh_command(&self, remote: &str) -> Command {
        let mut command = Command::new("ssh");
        command
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg(format!("{}@{}", self.user, self.host))
            .arg(remote);
        command
    }

    fn remote_shell(&self, tail: &str) -> String {
        match &self.preamble {
            Some(preamble) => format!("{preamble}; {tail}"),
            None => tail.to_string(),
        }
    }

    /// ssh exits with 255 when the transport itself failed; anything else
    /// came from the remote command.
    fn check_transport(&self, output: &std::process::Output) -> Result<(), AdminError> {
        if output.status.code() == Some(255) {
            return TransportSnafu {
                host: &self.host,
                user: &self.user,
                status: output.status.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .fail();
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AdminExec for RemoteSession {
    async fn run_batch(
        &self,
        connect: &str,
        statements: &[String],
    ) -> Result<Vec<String>, AdminError> {
        let tail = format!(
            "export ORACLE_SID={sid}; export ORACLE_HOME={home}; {home}/bin/sqlplus -s /nolog",
            sid = self.sid,
            home = self.home,
        );
        let remote = self.remote_shell(&tail);
        tracing::debug!(host = %self.host, sid = %self.sid, statements = statements.len(),
            "remote administrative session");

        let mut child = self
            .ssh_command(&remote)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context(SpawnSnafu { program: "ssh" })?;

        let script = session_script(connect, statements);
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .context(StreamSnafu { program: "ssh" })?;
        }

        let output = child
            .wait_with_output()
            .await
            .context(CollectSnafu { program: "ssh" })?;
        self.check_transport(&output)?;
        Ok(clean_lines(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn run_os(&self, command: &str) -> Result<Vec<String>, AdminError> {
        let remote = self.remote_shell(command);
        tracing::debug!(host = %self.host, command, "running remote host command");
        let output = self
            .ssh_command(&remote)
            .stdin(Stdio::null())
            .output()
            .await
            .context(SpawnSnafu { program: "ssh" })?;
        self.check_transport(&output)?;
        Ok(clean_lines(&String::from_utf8_lossy(&output.stdout)))
    }
}
