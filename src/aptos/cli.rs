use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::utils::config::CliConfig;

/// Runs read-only `aptos move view` calls without blocking the runtime.
#[derive(Debug, Clone)]
pub struct AptosCli {
    config: CliConfig,
}

impl AptosCli {
    pub fn new(config: CliConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn move_view(&self, function_id: &str, args: &[String]) -> Result<Vec<serde_json::Value>> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(["move", "view", "--function-id", function_id]);
        if !args.is_empty() {
            cmd.arg("--args").args(args);
        }
        cmd.args(["--profile", &self.config.profile])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("Running {} move view {}", self.config.binary, function_id);

        let output = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), cmd.output())
            .await
            .map_err(|_| {
                RelayError::CommandExecutionFailed(format!(
                    "{} timed out after {}s",
                    self.config.binary, self.config.timeout_secs
                ))
            })?
            .map_err(|e| {
                RelayError::CommandExecutionFailed(format!("failed to start {}: {}", self.config.binary, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{} exited with {}: {}", self.config.binary, output.status, stderr.trim());
            return Err(RelayError::CommandExecutionFailed(format!(
                "{} exited with {}: {}",
                self.config.binary,
                output.status,
                stderr.trim()
            )));
        }

        parse_view_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// The CLI prints `{"Result": [...]}` on success and `{"Error": "..."}` otherwise.
pub fn parse_view_output(stdout: &str) -> Result<Vec<serde_json::Value>> {
    let parsed: serde_json::Value = serde_json::from_str(stdout.trim()).map_err(|e| {
        RelayError::CommandExecutionFailed(format!("unparseable CLI output: {}", e))
    })?;

    if let Some(message) = parsed.get("Error").and_then(|e| e.as_str()) {
        return Err(RelayError::CommandExecutionFailed(message.to_string()));
    }

    match parsed.get("Result") {
        Some(serde_json::Value::Array(values)) => Ok(values.clone()),
        _ => Err(RelayError::CommandExecutionFailed(
            "CLI output has no Result array".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(binary: &str) -> CliConfig {
        CliConfig {
            enabled: true,
            binary: binary.to_string(),
            profile: "default".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn parses_result_array() {
        let values = parse_view_output(r#"{ "Result": [[{"symbol":"0x425443","amount":"2000000"}]] }"#).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0][0]["amount"], "2000000");
    }

    #[test]
    fn cli_error_and_garbage_are_command_failures() {
        assert!(matches!(
            parse_view_output(r#"{"Error":"API error: account not found"}"#),
            Err(RelayError::CommandExecutionFailed(_))
        ));
        assert!(matches!(
            parse_view_output("Enter your private key:"),
            Err(RelayError::CommandExecutionFailed(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_a_command_failure() {
        let cli = AptosCli::new(config("definitely-not-an-aptos-binary"));
        let err = cli.move_view("0x1::m::f", &[]).await.unwrap_err();
        assert!(matches!(err, RelayError::CommandExecutionFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_command_failure() {
        let cli = AptosCli::new(config("false"));
        let err = cli.move_view("0x1::m::f", &[]).await.unwrap_err();
        assert!(matches!(err, RelayError::CommandExecutionFailed(_)));
    }
}
