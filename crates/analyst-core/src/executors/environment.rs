//! Isolated Python environments provisioned with `uv`.
//!
//! One virtual environment is created per session, inside the session
//! workspace, and dependencies are installed into it on demand with a single
//! batched `uv pip install` per attempt.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use which::which;

use crate::config::RuntimeConfig;
use crate::errors::AnalystError;
use crate::executors::builtins::is_builtin_module;
use crate::executors::workspace::SessionWorkspace;

/// A declared dependency, e.g. `pandas`, `numpy==1.26` or `scikit-learn>=1.4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub requirement: String,
    pub name: String,
}

fn requirement_separator() -> Option<&'static Regex> {
    static SEPARATOR: OnceLock<Option<Regex>> = OnceLock::new();
    SEPARATOR
        .get_or_init(|| Regex::new(r"[=<>!~;,\[@ ]").ok())
        .as_ref()
}

impl Dependency {
    pub fn parse(requirement: &str) -> Self {
        let requirement = requirement.trim();
        let name = requirement_separator()
            .and_then(|re| re.split(requirement).next())
            .unwrap_or(requirement)
            .trim()
            .to_string();
        Self {
            requirement: requirement.to_string(),
            name,
        }
    }

    pub fn is_builtin(&self) -> bool {
        is_builtin_module(&self.name)
    }

    /// Requirements that must go through the installer, in declaration order.
    pub fn external(requirements: &[String]) -> Vec<Dependency> {
        requirements
            .iter()
            .map(|r| Dependency::parse(r))
            .filter(|d| !d.name.is_empty() && !d.is_builtin())
            .collect()
    }
}

/// Output of a failed install, fed back to the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallFailure {
    pub output: String,
}

impl fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.output)
    }
}

impl std::error::Error for InstallFailure {}

/// A ready-to-use interpreter rooted in a session workspace.
#[derive(Debug, Clone)]
pub struct EnvironmentHandle {
    workspace: PathBuf,
    venv: Option<PathBuf>,
    interpreter: PathBuf,
}

impl EnvironmentHandle {
    pub fn new(workspace: PathBuf, venv: PathBuf, interpreter: PathBuf) -> Self {
        Self {
            workspace,
            venv: Some(venv),
            interpreter,
        }
    }

    /// Use an existing interpreter without a virtual environment.
    pub fn with_interpreter(workspace: PathBuf, interpreter: PathBuf) -> Self {
        Self {
            workspace,
            venv: None,
            interpreter,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn venv(&self) -> Option<&Path> {
        self.venv.as_deref()
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentManager {
    uv_path: Option<PathBuf>,
    venv_dir: String,
    python: Option<String>,
    install_timeout: Duration,
}

impl EnvironmentManager {
    pub fn new(runtime: &RuntimeConfig) -> Self {
        Self {
            uv_path: runtime.uv_path.clone(),
            venv_dir: runtime.venv_dir.clone(),
            python: runtime.python.clone(),
            install_timeout: runtime.install_timeout(),
        }
    }

    pub fn with_uv_path(mut self, uv_path: PathBuf) -> Self {
        self.uv_path = Some(uv_path);
        self
    }

    pub fn venv_dir(&self) -> &str {
        &self.venv_dir
    }

    /// Interpreter entry point inside a virtual environment.
    pub fn interpreter_path(venv: &Path) -> PathBuf {
        if cfg!(windows) {
            venv.join("Scripts").join("python.exe")
        } else {
            venv.join("bin").join("python")
        }
    }

    fn find_uv(&self) -> Option<PathBuf> {
        if let Some(path) = &self.uv_path {
            if path.exists() {
                return Some(path.clone());
            }
            log::warn!("Configured uv path {} does not exist", path.display());
        }
        which("uv").ok()
    }

    /// Create the session's environment unless its interpreter already exists.
    pub async fn ensure_environment(
        &self,
        workspace: &SessionWorkspace,
    ) -> Result<EnvironmentHandle, AnalystError> {
        let venv = workspace.join(&self.venv_dir);
        let interpreter = Self::interpreter_path(&venv);
        let handle = EnvironmentHandle::new(
            workspace.path().to_path_buf(),
            venv.clone(),
            interpreter.clone(),
        );

        if interpreter.exists() {
            log::debug!("Reusing environment at {}", venv.display());
            return Ok(handle);
        }

        let uv = self.find_uv().ok_or_else(|| {
            AnalystError::InstallError("uv executable not found on PATH".to_string())
        })?;

        log::info!("Creating environment for session {}", workspace.id());
        let mut cmd = Command::new(&uv);
        cmd.arg("venv").arg(&venv).arg("--quiet");
        if let Some(python) = &self.python {
            cmd.arg("--python").arg(python);
        }
        cmd.current_dir(workspace.path()).kill_on_drop(true);

        let output = tokio::time::timeout(self.install_timeout, cmd.output())
            .await
            .map_err(|_| {
                AnalystError::InstallError(format!(
                    "uv venv timed out after {} seconds",
                    self.install_timeout.as_secs()
                ))
            })?
            .map_err(|e| AnalystError::InstallError(format!("Failed to run uv venv: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalystError::InstallError(format!(
                "uv venv failed: {}",
                stderr.trim()
            )));
        }

        if !interpreter.exists() {
            return Err(AnalystError::InstallError(format!(
                "interpreter missing after uv venv: {}",
                interpreter.display()
            )));
        }

        Ok(handle)
    }

    /// Install the external subset of `requirements` in one batch. Standard
    /// library names are dropped; nothing left means nothing to do.
    pub async fn install_dependencies(
        &self,
        environment: &EnvironmentHandle,
        requirements: &[String],
    ) -> Result<(), InstallFailure> {
        let external = Dependency::external(requirements);
        if external.is_empty() {
            return Ok(());
        }

        let uv = self.find_uv().ok_or_else(|| InstallFailure {
            output: "uv executable not found on PATH".to_string(),
        })?;

        let packages: Vec<&str> = external.iter().map(|d| d.requirement.as_str()).collect();
        log::info!("Installing dependencies: {}", packages.join(" "));

        let mut cmd = Command::new(&uv);
        cmd.arg("pip")
            .arg("install")
            .arg("--quiet")
            .arg("--python")
            .arg(environment.interpreter())
            .args(&packages)
            .current_dir(environment.workspace())
            .kill_on_drop(true);
        if let Some(venv) = environment.venv() {
            cmd.env("VIRTUAL_ENV", venv);
        }

        let output = match tokio::time::timeout(self.install_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(InstallFailure {
                    output: format!("Failed to run uv: {}", e),
                })
            }
            Err(_) => {
                return Err(InstallFailure {
                    output: format!(
                        "Dependency installation timed out after {} seconds.",
                        self.install_timeout.as_secs()
                    ),
                })
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let output = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            stderr
        };
        log::warn!("Dependency installation failed: {}", output.trim());
        Err(InstallFailure { output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_names_strip_constraints() {
        assert_eq!(Dependency::parse("pandas").name, "pandas");
        assert_eq!(Dependency::parse(" numpy==1.26.4 ").name, "numpy");
        assert_eq!(Dependency::parse("scikit-learn>=1.4,<2").name, "scikit-learn");
        assert_eq!(Dependency::parse("requests[socks]").name, "requests");
        assert_eq!(Dependency::parse("torch ; python_version > '3.8'").name, "torch");
        assert_eq!(Dependency::parse("numpy==1.26.4").requirement, "numpy==1.26.4");
    }

    #[test]
    fn test_external_partition_drops_stdlib() {
        let external = Dependency::external(&[
            "os".to_string(),
            "pandas".to_string(),
            "json".to_string(),
            "".to_string(),
            "matplotlib>=3.8".to_string(),
        ]);
        let requirements: Vec<&str> = external.iter().map(|d| d.requirement.as_str()).collect();
        assert_eq!(requirements, vec!["pandas", "matplotlib>=3.8"]);
    }

    #[tokio::test]
    async fn test_builtin_only_install_is_noop() {
        // A bogus uv path proves the installer is never invoked.
        let manager = EnvironmentManager::new(&RuntimeConfig::default())
            .with_uv_path(PathBuf::from("/nonexistent/uv"));
        let environment = EnvironmentHandle::with_interpreter(
            std::env::temp_dir(),
            PathBuf::from("/nonexistent/python"),
        );

        let result = manager
            .install_dependencies(&environment, &["os".to_string(), "sys".to_string()])
            .await;
        assert!(result.is_ok());
    }
}
