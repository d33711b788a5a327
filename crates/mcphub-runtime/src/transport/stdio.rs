//! Child-process stdio transport.
//!
//! Launches the resolved command with the resolved arguments. The child
//! inherits the parent environment, with `MCP_ENV_VARS` (a JSON mapping from
//! the hub's own environment) layered on top and the server's resolved `env`
//! above both. stderr is piped and drained into warn-level logs.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::ServiceExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use mcphub_core::{HubEvent, LogLevel, ServerConfig};

use super::ConnectOutcome;
use crate::supervisor::client::HubClientHandler;

/// Environment variable holding a JSON mapping merged into every stdio
/// child, below the server's own resolved `env`.
pub const MCP_ENV_VARS: &str = "MCP_ENV_VARS";

pub struct StdioTransport {
    server: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl StdioTransport {
    pub fn from_config(server: &str, config: &ServerConfig) -> Self {
        Self {
            server: server.to_string(),
            command: config.command.clone().unwrap_or_default(),
            args: config.args.clone(),
            env: config
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().unwrap_or_default()))
                .collect(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Split a command that carries embedded arguments. Configs copied from
    /// other launchers often write `"command": "npx -y @scope/server"` with
    /// no separate `args`.
    fn parse_command(command: &str, args: &[String]) -> Result<(String, Vec<String>), String> {
        if !args.is_empty() || !command.contains(' ') {
            return Ok((command.to_string(), args.to_vec()));
        }
        let parts = shell_words::split(command)
            .map_err(|e| format!("cannot parse command string '{command}': {e}"))?;
        match parts.split_first() {
            Some((executable, rest)) => Ok((executable.clone(), rest.to_vec())),
            None => Err("empty command after parsing".to_string()),
        }
    }

    /// Extra environment from `MCP_ENV_VARS`, if set and well-formed.
    fn ambient_env() -> BTreeMap<String, String> {
        let Ok(raw) = std::env::var(MCP_ENV_VARS) else {
            return BTreeMap::new();
        };
        match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "[StdioTransport] Ignoring malformed MCP_ENV_VARS");
                BTreeMap::new()
            }
        }
    }

    pub async fn connect(self, handler: HubClientHandler, timeout: Duration) -> ConnectOutcome {
        info!(
            server = %self.server,
            command = %self.command,
            "[StdioTransport] Launching server process"
        );

        let (executable, args) = match Self::parse_command(&self.command, &self.args) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(server = %self.server, "{e}");
                return ConnectOutcome::Failed(e);
            }
        };

        let command_path = match which::which(&executable)
            .or_else(|_| which::which(format!("{executable}.exe")))
        {
            Ok(path) => path,
            Err(_) => {
                let err = format!(
                    "command not found: {executable}; ensure it is installed and in PATH"
                );
                error!(server = %self.server, "{err}");
                return ConnectOutcome::Failed(err);
            }
        };
        debug!(server = %self.server, path = ?command_path, "[StdioTransport] Resolved command");

        let mut env = Self::ambient_env();
        env.extend(self.env.clone());

        let command = Command::new(&command_path).configure(move |cmd| {
            cmd.args(&args)
                .envs(&env)
                .kill_on_drop(true);

            // New process group so terminal signals aimed at the hub don't
            // reach the children.
            #[cfg(unix)]
            {
                cmd.process_group(0);
            }
        });

        let spawn_result = TokioChildProcess::builder(command)
            .stderr(Stdio::piped())
            .spawn();
        let (transport, stderr) = match spawn_result {
            Ok(pair) => pair,
            Err(e) => {
                let err = format!("failed to spawn process: {e}");
                error!(server = %self.server, "{err}");
                return ConnectOutcome::Failed(err);
            }
        };

        if let Some(stderr) = stderr {
            let server = self.server.clone();
            let events = handler.events().clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(server = %server, "[stderr] {line}");
                    events.emit(HubEvent::Log {
                        level: LogLevel::Warn,
                        message: format!("[{server}] {line}"),
                    });
                }
            });
        }

        let connect_future = handler.serve(transport);
        match tokio::time::timeout(timeout, connect_future).await {
            Ok(Ok(client)) => {
                info!(server = %self.server, "[StdioTransport] Server connected");
                ConnectOutcome::Connected(client)
            }
            Ok(Err(e)) => {
                let err = format!("MCP handshake failed: {e}");
                error!(server = %self.server, "{err}");
                ConnectOutcome::Failed(err)
            }
            Err(_) => {
                let err = format!("connection timeout ({timeout:?})");
                error!(server = %self.server, "{err}");
                ConnectOutcome::Failed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_with_separate_args() {
        let (exe, args) =
            StdioTransport::parse_command("docker", &["run".into(), "-i".into()]).unwrap();
        assert_eq!(exe, "docker");
        assert_eq!(args, vec!["run", "-i"]);
    }

    #[test]
    fn test_parse_command_with_embedded_args() {
        let (exe, args) = StdioTransport::parse_command("npx -y @scope/server", &[]).unwrap();
        assert_eq!(exe, "npx");
        assert_eq!(args, vec!["-y", "@scope/server"]);
    }

    #[test]
    fn test_parse_command_respects_quoting() {
        let (exe, args) =
            StdioTransport::parse_command(r#"run "a b" c"#, &[]).unwrap();
        assert_eq!(exe, "run");
        assert_eq!(args, vec!["a b", "c"]);
    }

    #[test]
    fn test_parse_command_unmatched_quote_is_error() {
        assert!(StdioTransport::parse_command(r#"run "a b"#, &[]).is_err());
    }

    #[test]
    fn test_resolved_env_overrides_ambient() {
        // ambient below resolved: extend() lets the server env win.
        let mut env: BTreeMap<String, String> =
            [("SHARED".to_string(), "ambient".to_string())].into();
        env.extend([("SHARED".to_string(), "resolved".to_string())]);
        assert_eq!(env["SHARED"], "resolved");
    }
}
