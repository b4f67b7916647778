// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker CLI engine.
//!
//! Drives a docker-compatible CLI (`docker`, `podman`, `sudo docker`) with
//! `tokio::process`. Engine stderr is carried verbatim in the returned error.
//! Child processes are killed when the calling future is dropped, so a
//! deadline applied by the caller also stops the CLI.

use std::net::SocketAddrV4;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::tag::TagClock;
use super::traits::*;
use crate::config::ConfigError;
use crate::descriptor::DESCRIPTOR_FILE;
use crate::error::{Error, Result};

/// Engine driven through a docker-compatible command line.
#[derive(Debug)]
pub struct DockerCli {
    program: String,
    base_args: Vec<String>,
    tags: TagClock,
}

impl DockerCli {
    /// Create an engine from a command line such as `docker` or `sudo docker`.
    pub fn new(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ConfigError::InvalidValue {
                var: "BULUT_DOCKER_BIN",
                value: command.to_string(),
            })?;

        Ok(Self {
            program,
            base_args: parts.collect(),
            tags: TagClock::new(),
        })
    }

    /// Run one CLI invocation and return its trimmed stdout.
    ///
    /// A spawn failure or non-zero exit is reported through `on_error`.
    async fn exec(&self, args: &[&str], on_error: fn(String) -> Error) -> Result<String> {
        debug!(program = %self.program, args = ?args, "Running engine command");

        let output = Command::new(&self.program)
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| on_error(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} {} exited with {}", self.program, args.join(" "), output.status)
            } else {
                stderr
            };
            return Err(on_error(message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Last non-empty line, which is where the CLI prints ids.
fn last_line(stdout: &str) -> Option<&str> {
    stdout.lines().map(str::trim).rfind(|l| !l.is_empty())
}

fn is_missing_container(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container") || lower.contains("no container with name or id")
}

#[async_trait]
impl ImageBuilder for DockerCli {
    fn engine_type(&self) -> &'static str {
        "docker"
    }

    async fn build(&self, context_dir: &Path, image_repo: &str) -> Result<BuiltImage> {
        let started = Instant::now();
        let image_tag = self.tags.next_tag();
        let image_name = format!("{}:{}", image_repo, image_tag);
        let latest = format!("{}:latest", image_repo);
        let context = context_dir.to_string_lossy();
        let descriptor = context_dir.join(DESCRIPTOR_FILE);
        let descriptor = descriptor.to_string_lossy();

        self.exec(
            &[
                "build",
                "--tag",
                &image_name,
                "--file",
                &descriptor,
                &context,
            ],
            Error::BuildFailed,
        )
        .await?;

        // `tag` replaces an existing reference, so `latest` always moves.
        self.exec(&["tag", &image_name, &latest], Error::BuildFailed)
            .await?;

        let inspected = self
            .exec(
                &["image", "inspect", "--format", "{{.Id}}", &image_name],
                Error::BuildFailed,
            )
            .await?;
        let image_id = last_line(&inspected)
            .ok_or_else(|| {
                Error::BuildFailed(format!("engine returned no image id for {}", image_name))
            })?
            .to_string();

        info!(
            image_name = %image_name,
            image_id = %image_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Image built"
        );

        Ok(BuiltImage {
            image_id,
            image_name,
            image_tag,
        })
    }
}

#[async_trait]
impl ContainerController for DockerCli {
    async fn stop_and_remove(&self, container: &str) -> Result<()> {
        match self
            .exec(
                &["rm", "--force", "--volumes", container],
                Error::ContainerRemovalFailed,
            )
            .await
        {
            Ok(_) => {
                info!(container = %container, "Container removed");
                Ok(())
            }
            Err(Error::ContainerRemovalFailed(msg)) if is_missing_container(&msg) => {
                debug!(container = %container, "Container already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn run(&self, request: &RunRequest) -> Result<RunningContainer> {
        let publish = format!(
            "{}:{}:{}",
            request.address, request.host_port, request.container_port
        );
        let port_env = format!("PORT={}", request.container_port);

        let created = self
            .exec(
                &[
                    "create",
                    "--name",
                    &request.container_name,
                    "--publish",
                    &publish,
                    "--env",
                    &port_env,
                    &request.image_name,
                ],
                Error::ContainerStartFailed,
            )
            .await?;
        let container_id = last_line(&created)
            .ok_or_else(|| {
                Error::ContainerStartFailed(format!(
                    "engine returned no container id for {}",
                    request.container_name
                ))
            })?
            .to_string();

        if let Err(e) = self
            .exec(&["start", &container_id], Error::ContainerStartFailed)
            .await
        {
            if let Err(cleanup) = self.stop_and_remove(&container_id).await {
                warn!(
                    container_id = %container_id,
                    error = %cleanup,
                    "Failed to remove container that did not start"
                );
            }
            return Err(e);
        }

        let bound_address = SocketAddrV4::new(request.address, request.host_port);
        info!(
            container_id = %container_id,
            container_name = %request.container_name,
            address = %bound_address,
            "Container started"
        );

        Ok(RunningContainer {
            container_id,
            bound_address,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    /// Writes a fake engine script and returns a command line that runs it
    /// through `sh`, so the script never needs to be executable.
    fn fake_engine(dir: &Path, body: &str) -> DockerCli {
        let script = dir.join("engine.sh");
        let log = dir.join("calls.log");
        std::fs::write(
            &script,
            format!("echo \"$@\" >> {}\n{}", log.display(), body),
        )
        .unwrap();
        DockerCli::new(&format!("sh {}", script.display())).unwrap()
    }

    fn calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn request() -> RunRequest {
        RunRequest {
            image_name: "bulut-ns-dep:20250301000000000".to_string(),
            container_name: "bulut-ns-dep".to_string(),
            address: Ipv4Addr::new(127, 0, 0, 100),
            container_port: 8080,
            host_port: 1234,
        }
    }

    const HAPPY: &str = r#"
case "$1" in
  image) echo "sha256:feedface" ;;
  create) echo "warning: something"; echo "c0ffee" ;;
esac
exit 0
"#;

    #[test]
    fn test_new_rejects_empty_command() {
        assert!(DockerCli::new("   ").is_err());
        let cli = DockerCli::new("sudo docker").unwrap();
        assert_eq!(cli.program, "sudo");
        assert_eq!(cli.base_args, vec!["docker"]);
    }

    #[tokio::test]
    async fn test_build_tags_latest_and_inspects() {
        let temp = TempDir::new().unwrap();
        let engine = fake_engine(temp.path(), HAPPY);

        let image = engine.build(temp.path(), "bulut-ns-dep").await.unwrap();

        assert_eq!(image.image_id, "sha256:feedface");
        assert_eq!(image.image_name, format!("bulut-ns-dep:{}", image.image_tag));

        let calls = calls(temp.path());
        assert_eq!(calls.len(), 3);
        assert!(calls[0].starts_with(&format!("build --tag {}", image.image_name)));
        assert_eq!(
            calls[1],
            format!("tag {} bulut-ns-dep:latest", image.image_name)
        );
        assert!(calls[2].starts_with("image inspect"));
    }

    #[tokio::test]
    async fn test_build_failure_carries_engine_stderr() {
        let temp = TempDir::new().unwrap();
        let engine = fake_engine(
            temp.path(),
            "echo 'failed to solve: node:18-alpine: not found' >&2\nexit 1\n",
        );

        let err = engine.build(temp.path(), "bulut-ns-dep").await.unwrap_err();
        match err {
            Error::BuildFailed(msg) => {
                assert_eq!(msg, "failed to solve: node:18-alpine: not found")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(calls(temp.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_run_creates_and_starts() {
        let temp = TempDir::new().unwrap();
        let engine = fake_engine(temp.path(), HAPPY);

        let running = engine.run(&request()).await.unwrap();

        assert_eq!(running.container_id, "c0ffee");
        assert_eq!(running.bound_address.to_string(), "127.0.0.100:1234");
        let calls = calls(temp.path());
        assert!(calls[0].contains("--publish 127.0.0.100:1234:8080"));
        assert_eq!(calls[1], "start c0ffee");
    }

    #[tokio::test]
    async fn test_start_failure_removes_created_container() {
        let temp = TempDir::new().unwrap();
        let engine = fake_engine(
            temp.path(),
            r#"
case "$1" in
  create) echo "c0ffee" ;;
  start) echo "port is already allocated" >&2; exit 1 ;;
esac
exit 0
"#,
        );

        let err = engine.run(&request()).await.unwrap_err();
        assert!(matches!(err, Error::ContainerStartFailed(ref m) if m == "port is already allocated"));

        let calls = calls(temp.path());
        assert_eq!(calls.last().unwrap(), "rm --force --volumes c0ffee");
    }

    #[tokio::test]
    async fn test_remove_missing_container_is_ok() {
        let temp = TempDir::new().unwrap();
        let engine = fake_engine(
            temp.path(),
            "echo 'Error response from daemon: No such container: gone' >&2\nexit 1\n",
        );

        assert!(engine.stop_and_remove("gone").await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_failure_is_reported() {
        let temp = TempDir::new().unwrap();
        let engine = fake_engine(temp.path(), "echo 'daemon unavailable' >&2\nexit 1\n");

        let err = engine.stop_and_remove("abc").await.unwrap_err();
        assert_eq!(err.error_code(), "CONTAINER_REMOVAL_FAILED");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let engine = DockerCli::new("/nonexistent/bulut-docker").unwrap();
        let err = engine.build(Path::new("."), "repo").await.unwrap_err();
        assert!(matches!(err, Error::BuildFailed(ref m) if m.contains("failed to run")));
    }
}
