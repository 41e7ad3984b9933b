//! Worker process creation.
//!
//! A worker is the configured program re-executed with two environment
//! variables set: its id and the descriptor number of its control channel.
//! The child end of the control socket pair is installed at descriptor
//! [`CONTROL_FD`] between `fork` and `exec`.

use std::ffi::OsString;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::process::Stdio;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::dup2;
use thiserror::Error;
use tokio::process::{Child, Command};

use crate::cluster::WorkerId;
use crate::config::schema::ProcessConfig;
use crate::control::{ControlChannel, ControlError};

/// Marks a process as a worker and carries its id.
pub const WORKER_ID_ENV: &str = "CONN_DISPATCHER_WORKER_ID";

/// Descriptor number of the inherited control channel.
pub const CONTROL_FD_ENV: &str = "CONN_DISPATCHER_CONTROL_FD";

/// Where the child end of the control socket lands in the worker.
pub const CONTROL_FD: RawFd = 3;

/// Worker process could not be created.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("cannot determine worker program: {0}")]
    Program(#[source] io::Error),

    #[error("cannot create control channel: {0}")]
    Channel(#[from] ControlError),

    #[error("cannot start worker process {program:?}: {source}")]
    Exec {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Program and arguments used for every worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    /// Resolve from configuration; unset fields default to how this process was started.
    pub fn resolve(config: &ProcessConfig) -> Result<Self, SpawnError> {
        let program = match &config.program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(SpawnError::Program)?,
        };
        let args = match &config.args {
            Some(args) => args.iter().map(OsString::from).collect(),
            None => std::env::args_os().skip(1).collect(),
        };
        Ok(Self { program, args })
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

/// A freshly started worker process, not yet registered.
#[derive(Debug)]
pub struct SpawnedWorker {
    pub id: WorkerId,
    pub pid: u32,
    pub child: Child,
    pub channel: ControlChannel,
}

/// Start one worker process with its control channel wired to descriptor 3.
pub fn spawn_worker(command: &WorkerCommand, id: WorkerId) -> Result<SpawnedWorker, SpawnError> {
    let (master_end, child_end) = ControlChannel::pair()?;
    let child_raw = child_end.as_raw_fd();

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .env(WORKER_ID_ENV, id.to_string())
        .env(CONTROL_FD_ENV, CONTROL_FD.to_string())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    // SAFETY: only async-signal-safe calls (dup2, fcntl) run between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            if child_raw == CONTROL_FD {
                fcntl(CONTROL_FD, FcntlArg::F_SETFD(FdFlag::empty()))?;
            } else {
                // dup2 leaves the new descriptor without FD_CLOEXEC
                dup2(child_raw, CONTROL_FD)?;
            }
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|source| SpawnError::Exec {
        program: command.program.clone(),
        source,
    })?;
    drop(child_end);

    let pid = child.id().unwrap_or_default();
    let channel = ControlChannel::from_owned(master_end)?;

    tracing::info!(worker_id = %id, pid, "Worker process spawned");

    Ok(SpawnedWorker {
        id,
        pid,
        child,
        channel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlMessage;

    #[test]
    fn explicit_program_and_args_win() {
        let config = ProcessConfig {
            program: Some("/bin/true".into()),
            args: Some(vec!["--flag".into()]),
        };
        let command = WorkerCommand::resolve(&config).unwrap();
        assert_eq!(command.program(), &PathBuf::from("/bin/true"));
        assert_eq!(command.args, vec![OsString::from("--flag")]);
    }

    #[test]
    fn defaults_to_current_executable() {
        let command = WorkerCommand::resolve(&ProcessConfig::default()).unwrap();
        assert_eq!(command.program(), &std::env::current_exe().unwrap());
    }

    #[tokio::test]
    async fn missing_program_is_an_exec_error() {
        let config = ProcessConfig {
            program: Some("/nonexistent/conn-dispatcher-worker".into()),
            args: Some(vec![]),
        };
        let command = WorkerCommand::resolve(&config).unwrap();
        assert!(matches!(
            spawn_worker(&command, WorkerId::new(1)),
            Err(SpawnError::Exec { .. })
        ));
    }

    #[tokio::test]
    async fn child_talks_on_inherited_control_fd() {
        // 0o23 = 19 = len of {"type":"REGISTER"}
        let script = format!(
            "test \"${WORKER_ID_ENV}\" = 7 && test \"${CONTROL_FD_ENV}\" = 3 && \
             printf '\\000\\000\\000\\023{{\"type\":\"REGISTER\"}}' >&3"
        );
        let config = ProcessConfig {
            program: Some("/bin/sh".into()),
            args: Some(vec!["-c".into(), script]),
        };
        let command = WorkerCommand::resolve(&config).unwrap();
        let mut worker = spawn_worker(&command, WorkerId::new(7)).unwrap();
        assert!(worker.pid > 0);

        let received = worker.channel.recv().await.unwrap().unwrap();
        assert_eq!(received.message, ControlMessage::Register);
        assert!(received.handle.is_none());

        assert!(worker.child.wait().await.unwrap().success());
        assert!(worker.channel.recv().await.unwrap().is_none());
    }
}
