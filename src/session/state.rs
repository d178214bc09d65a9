//! Per-transport run state

use std::collections::VecDeque;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};

use crate::common::{Error, Result};
use crate::scenario::{Callback, ScenarioQueue};
use crate::transport::{RemoteDebuggee, TransportMode};

/// Out-of-band state decoded from a synchronization marker
///
/// The payload is a JSON object; `location`, `line` and `locals` are the
/// keys the debugger is known to send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InternalInfo {
    fields: Map<String, Value>,
}

impl InternalInfo {
    pub fn parse(payload: &str) -> Result<Self> {
        match serde_json::from_str(payload)? {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(Error::ProtocolDesync(format!(
                "Expected a JSON object in the synchronization marker, got: {}",
                other
            ))),
        }
    }

    pub fn line(&self) -> Option<u64> {
        self.fields.get("line").and_then(Value::as_u64)
    }

    /// `"path:line"` of the current frame
    pub fn location(&self) -> Option<&str> {
        self.fields.get("location").and_then(Value::as_str)
    }

    pub fn locals(&self) -> Option<&Map<String, Value>> {
        self.fields.get("locals").and_then(Value::as_object)
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals().and_then(|locals| locals.get(name))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Everything one transport run knows and owns
///
/// Never shared between workers. Callbacks receive it mutably so they can
/// record a failed process or inspect the backlogs.
pub struct RunState {
    mode: TransportMode,
    prompt: Regex,
    backlog: Vec<String>,
    segment: Vec<String>,
    pub(crate) queue: ScenarioQueue,
    internal_info: Option<InternalInfo>,
    remote: Option<Box<dyn RemoteDebuggee>>,
    failed_process: Option<String>,
    pub(crate) confirming: bool,
    pub(crate) pending: VecDeque<Callback>,
}

impl RunState {
    pub fn new(mode: TransportMode, prompt: Regex, queue: ScenarioQueue) -> Self {
        Self {
            mode,
            prompt,
            backlog: Vec::new(),
            segment: Vec::new(),
            queue,
            internal_info: None,
            remote: None,
            failed_process: None,
            confirming: false,
            pending: VecDeque::new(),
        }
    }

    pub fn with_remote(mut self, remote: Box<dyn RemoteDebuggee>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn prompt(&self) -> &Regex {
        &self.prompt
    }

    /// Every line the driven process printed, markers excluded
    pub fn backlog(&self) -> &[String] {
        &self.backlog
    }

    /// Lines since the last command was sent
    pub fn segment(&self) -> &[String] {
        &self.segment
    }

    /// Output of the last command, without the echoed prompt line
    pub fn recent_output(&self) -> String {
        self.segment
            .iter()
            .skip(1)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn internal_info(&self) -> Option<&InternalInfo> {
        self.internal_info.as_ref()
    }

    pub fn remote(&self) -> Option<&dyn RemoteDebuggee> {
        self.remote.as_deref()
    }

    /// The remote debuggee's own output; empty for local runs
    pub fn debuggee_backlog(&self) -> Vec<String> {
        self.remote
            .as_ref()
            .map(|remote| remote.backlog())
            .unwrap_or_default()
    }

    pub fn failed_process(&self) -> Option<&str> {
        self.failed_process.as_deref()
    }

    pub fn set_failed_process(&mut self, name: impl Into<String>) {
        self.failed_process = Some(name.into());
    }

    /// Directives not yet dispatched
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn is_confirming(&self) -> bool {
        self.confirming
    }

    pub(crate) fn push_line(&mut self, line: String) {
        self.segment.push(line.clone());
        self.backlog.push(line);
    }

    pub(crate) fn clear_segment(&mut self) {
        self.segment.clear();
    }

    pub(crate) fn set_internal_info(&mut self, info: InternalInfo) {
        self.internal_info = Some(info);
    }

    /// Start a new dispatch cycle: no confirmation pending
    pub(crate) fn reset_confirmation(&mut self) {
        self.confirming = false;
        self.pending.clear();
    }

    /// Stop the remote debuggee, recording it when it would not finish
    pub(crate) async fn terminate_remote(&mut self, wait: Duration) {
        if let Some(remote) = self.remote.as_mut() {
            if !remote.terminate(wait).await {
                self.failed_process = Some("remote".to_string());
            }
        }
    }
}
