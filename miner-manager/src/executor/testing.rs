//! Scripted remote host for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::process::command_line;
use super::{RemoteExecutor, RemoteFilesystem};
use crate::error::{Error, ExecutionError, ExecutionFailure, Result};
use crate::types::MachineName;

#[derive(Clone)]
enum Reply {
    Output(String),
    Fail,
}

#[derive(Default)]
struct Script {
    /// One-shot replies per leading flag, consumed in order.
    queued: HashMap<String, VecDeque<Reply>>,
    /// Reply used once the queue for a flag is empty.
    fallback: HashMap<String, Reply>,
    unreachable: bool,
    has_service: bool,
    paths: HashSet<String>,
    fail_removal: bool,
    fail_create: bool,
    calls: Vec<String>,
}

/// In-memory stand-in for a remote host.
///
/// Replies are keyed by the first argument of the worker command (`-r`,
/// `-l`, `-c`, `-s`). Every command and filesystem operation is recorded.
pub(crate) struct ScriptedRemote {
    script: Mutex<Script>,
    report_gate: watch::Sender<bool>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        let (report_gate, _) = watch::channel(true);
        Self {
            script: Mutex::new(Script::default()),
            report_gate,
        }
    }

    /// Queue a one-shot reply for `flag`.
    pub fn reply(&self, flag: &str, output: &str) -> &Self {
        self.script
            .lock()
            .queued
            .entry(flag.to_string())
            .or_default()
            .push_back(Reply::Output(output.to_string()));
        self
    }

    /// Queue a one-shot failure for `flag`.
    pub fn fail(&self, flag: &str) -> &Self {
        self.script
            .lock()
            .queued
            .entry(flag.to_string())
            .or_default()
            .push_back(Reply::Fail);
        self
    }

    /// Answer `flag` with `output` whenever nothing is queued.
    pub fn always(&self, flag: &str, output: &str) -> &Self {
        self.script
            .lock()
            .fallback
            .insert(flag.to_string(), Reply::Output(output.to_string()));
        self
    }

    /// Make every command, probe and service scan fail as if the host
    /// were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.script.lock().unreachable = unreachable;
    }

    pub fn set_has_service(&self, has_service: bool) {
        self.script.lock().has_service = has_service;
    }

    pub fn add_path(&self, path: &str) {
        self.script.lock().paths.insert(path.to_string());
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.script.lock().paths.contains(path)
    }

    pub fn set_fail_removal(&self, fail: bool) {
        self.script.lock().fail_removal = fail;
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.script.lock().fail_create = fail;
    }

    /// Block `-r` calls until [`release_reports`](Self::release_reports).
    pub fn hold_reports(&self) {
        self.report_gate.send_replace(false);
    }

    pub fn release_reports(&self) {
        self.report_gate.send_replace(true);
    }

    /// Every recorded call, e.g. `run -s install` or `remove c:\x`.
    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    /// Number of worker commands issued with the given leading flag.
    pub fn count(&self, flag: &str) -> usize {
        let prefix = format!("run {flag}");
        self.script
            .lock()
            .calls
            .iter()
            .filter(|call| *call == &prefix || call.starts_with(&format!("{prefix} ")))
            .count()
    }

    fn record(&self, call: String) {
        self.script.lock().calls.push(call);
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedRemote {
    async fn run(
        &self,
        host: &MachineName,
        executable: &str,
        args: &[String],
    ) -> std::result::Result<String, ExecutionError> {
        let flag = args.first().cloned().unwrap_or_default();
        self.record(format!("run {}", args.join(" ")));

        if flag == "-r" {
            let mut gate = self.report_gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;
        }

        let failure = |cause| ExecutionError::new(host.as_str(), command_line(executable, args), cause);

        let reply = {
            let mut script = self.script.lock();
            if script.unreachable {
                return Err(failure(ExecutionFailure::Unreachable("scripted outage".into())));
            }
            let queued = script.queued.get_mut(&flag).and_then(VecDeque::pop_front);
            queued.or_else(|| script.fallback.get(&flag).cloned())
        };

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Fail) => Err(failure(ExecutionFailure::NonZeroExit {
                code: 1,
                stderr: "scripted failure".into(),
            })),
            None => Err(failure(ExecutionFailure::MalformedOutput(format!(
                "no scripted reply for {flag}"
            )))),
        }
    }

    async fn probe(&self, host: &MachineName, _timeout: Duration) -> Result<()> {
        self.record(format!("probe {host}"));
        if self.script.lock().unreachable {
            return Err(Error::Connectivity {
                host: host.to_string(),
                reason: "scripted outage".into(),
            });
        }
        Ok(())
    }

    async fn has_mining_service(
        &self,
        host: &MachineName,
    ) -> std::result::Result<bool, ExecutionError> {
        self.record(format!("scan {host}"));
        let script = self.script.lock();
        if script.unreachable {
            return Err(ExecutionError::new(
                host.as_str(),
                "sc.exe query",
                ExecutionFailure::Unreachable("scripted outage".into()),
            ));
        }
        Ok(script.has_service)
    }
}

#[async_trait]
impl RemoteFilesystem for ScriptedRemote {
    async fn exists(&self, _host: &MachineName, path: &str) -> Result<bool> {
        self.record(format!("exists {path}"));
        Ok(self.script.lock().paths.contains(path))
    }

    async fn create_dir_all(&self, _host: &MachineName, path: &str) -> Result<()> {
        self.record(format!("create {path}"));
        let mut script = self.script.lock();
        if script.fail_create {
            return Err(Error::path(path, "access denied"));
        }
        script.paths.insert(path.to_string());
        Ok(())
    }

    async fn remove_dir_all(&self, _host: &MachineName, path: &str) -> Result<()> {
        self.record(format!("remove {path}"));
        let mut script = self.script.lock();
        if script.fail_removal {
            return Err(Error::path(path, "file in use"));
        }
        script.paths.retain(|p| !p.starts_with(path));
        Ok(())
    }
}
