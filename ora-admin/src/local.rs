use crate::{
    error::{AdminError, CollectSnafu, SpawnSnafu, StreamSnafu},
    script::{clean_lines, session_script},
    AdminExec,
};
use snafu::ResultExt;
use std::process::Stdio;
use tokio::{io::AsyncWriteExt, process::Command};

/// Drives `sqlplus -s /nolog` for one instance on the local host.
#[derive(Debug, Clone)]
pub struct LocalSession {
    sid: String,
    home: String,
}

impl LocalSession {
    pub fn new(sid: impl Into<String>, home: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            home: home.into(),
        }
    }

    fn sqlplus(&self) -> String {
        format!("{}/bin/sqlplus", self.home)
    }
}

#[async_trait::async_trait]
impl AdminExec for LocalSession {
    async fn run_batch(
        &self,
        connect: &str,
        statements: &[String],
    ) -> Result<Vec<String>, AdminError> {
        let program = self.sqlplus();
        tracing::debug!(sid = %self.sid, statements = statements.len(), "administrative session");

        let mut child = Command::new(&program)
            .arg("-s")
            .arg("/nolog")
            .env("ORACLE_SID", &self.sid)
            .env("ORACLE_HOME", &self.home)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context(SpawnSnafu { program: &program })?;

        let script = session_script(connect, statements);
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .context(StreamSnafu { program: &program })?;
        }

        let output = child
            .wait_with_output()
            .await
            .context(CollectSnafu { program: &program })?;
        Ok(clean_lines(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn run_os(&self, command: &str) -> Result<Vec<String>, AdminError> {
        tracing::debug!(command, "running host command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .context(SpawnSnafu { program: "sh" })?;
        Ok(clean_lines(&String::from_utf8_lossy(&output.stdout)))
    }
}
