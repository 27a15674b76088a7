//! Consolidation oracles backed by external commands
//!
//! The production oracle is an LLM CLI. It gets the consolidation prompt
//! either as an argument (wherever `{prompt}` appears in the configured
//! argv) or on stdin, and its stdout is the answer. CLIs that wrap their
//! answer in a `{"result": ..., "is_error": ...}` envelope are unwrapped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::consolidation::{ConsolidationOracle, ConsolidationRequest};
use crate::error::{OracleError, OracleResult};

/// Placeholder replaced by the prompt in oracle arguments
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Longest stderr excerpt carried in an error
const STDERR_EXCERPT: usize = 500;

/// How to reach the consolidation oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Program and arguments; empty disables consolidation
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 60,
        }
    }
}

impl OracleConfig {
    /// Build the oracle this config describes
    pub fn build(&self) -> Box<dyn ConsolidationOracle> {
        match CommandOracle::from_config(self) {
            Some(oracle) => Box::new(oracle),
            None => Box::new(DisabledOracle),
        }
    }
}

/// Runs a command per consultation
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandOracle {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// None when no command is configured
    pub fn from_config(config: &OracleConfig) -> Option<Self> {
        let (program, args) = config.command.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self::new(
            program.clone(),
            args.to_vec(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    async fn run(&self, prompt: &str) -> OracleResult<String> {
        let inline = self.args.iter().any(|a| a.contains(PROMPT_PLACEHOLDER));
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(PROMPT_PLACEHOLDER, prompt))
            .collect();

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if inline { Stdio::null() } else { Stdio::piped() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OracleError::Spawn(format!("{}: {}", self.program, e)))?;

        if !inline {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(prompt.as_bytes()).await?;
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            return Err(OracleError::Failed(format!("{} ({})", output.status, excerpt)));
        }

        unwrap_envelope(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl ConsolidationOracle for CommandOracle {
    fn name(&self) -> &str {
        &self.program
    }

    async fn consult(&self, request: &ConsolidationRequest) -> OracleResult<String> {
        let prompt = request.prompt();
        debug!("Consulting {} with a {} byte prompt", self.program, prompt.len());

        // Dropping the future on timeout kills the child
        match tokio::time::timeout(self.timeout, self.run(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(self.timeout.as_secs())),
        }
    }
}

/// Stand-in when no oracle command is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledOracle;

#[async_trait]
impl ConsolidationOracle for DisabledOracle {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn consult(&self, _request: &ConsolidationRequest) -> OracleResult<String> {
        Err(OracleError::Failed("no oracle command configured".into()))
    }
}

/// Extract the answer from an envelope, or pass raw output through
fn unwrap_envelope(stdout: &str) -> OracleResult<String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(OracleError::Empty);
    }

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(serde_json::Value::String(result)) = map.get("result") {
            if map.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false) {
                return Err(OracleError::Failed(result.clone()));
            }
            return Ok(result.clone());
        }
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Registry;

    fn request() -> ConsolidationRequest {
        ConsolidationRequest::new(10, &Registry::default(), &[])
    }

    fn sh(script: &str, timeout_secs: u64) -> CommandOracle {
        CommandOracle::new(
            "sh",
            vec!["-c".into(), script.into()],
            Duration::from_secs(timeout_secs),
        )
    }

    #[test]
    fn test_envelope() {
        assert_eq!(unwrap_envelope("{\"result\": \"{}\", \"is_error\": false}").unwrap(), "{}");
        assert!(matches!(
            unwrap_envelope("{\"result\": \"rate limited\", \"is_error\": true}"),
            Err(OracleError::Failed(_))
        ));
        // A bare patch document is not an envelope
        assert_eq!(
            unwrap_envelope("{\"insights\": \"x\"}\n").unwrap(),
            "{\"insights\": \"x\"}"
        );
        assert!(matches!(unwrap_envelope("  \n"), Err(OracleError::Empty)));
    }

    #[test]
    fn test_from_config() {
        assert!(CommandOracle::from_config(&OracleConfig::default()).is_none());
        let config = OracleConfig {
            command: vec!["claude".into(), "-p".into(), "{prompt}".into()],
            timeout_secs: 30,
        };
        let oracle = CommandOracle::from_config(&config).unwrap();
        assert_eq!(oracle.name(), "claude");
        assert_eq!(oracle.timeout, Duration::from_secs(30));
        assert_eq!(OracleConfig::default().build().name(), "disabled");
    }

    #[tokio::test]
    async fn test_prompt_via_stdin() {
        let oracle = sh("grep -c 'Current Capabilities'", 10);
        assert_eq!(oracle.consult(&request()).await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_prompt_via_argument() {
        let oracle = CommandOracle::new(
            "sh",
            vec!["-c".into(), "printf '%s' \"$1\" | grep -c 'Current Anti-Patterns'".into(), "oracle".into(), "{prompt}".into()],
            Duration::from_secs(10),
        );
        assert_eq!(oracle.consult(&request()).await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_failures() {
        let failing = sh("cat >/dev/null; echo boom >&2; exit 3", 10);
        match failing.consult(&request()).await {
            Err(OracleError::Failed(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected failure, got {:?}", other),
        }

        let slow = sh("cat >/dev/null; sleep 5", 1);
        assert!(matches!(slow.consult(&request()).await, Err(OracleError::Timeout(1))));

        let missing = CommandOracle::new("definitely-not-a-real-oracle", vec![], Duration::from_secs(1));
        assert!(matches!(missing.consult(&request()).await, Err(OracleError::Spawn(_))));

        assert!(DisabledOracle.consult(&request()).await.is_err());
    }
}
