//! Post-fetch provisioning: Python packages, system packages, setup script.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
};

use {
    async_trait::async_trait,
    tracing::{debug, info},
};

use crate::{
    error::{Error, Result},
    ticket::InstallTicket,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionStep {
    Pip(Vec<String>),
    System(Vec<String>),
    /// Path relative to the bundle root.
    Script(PathBuf),
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pip(packages) => write!(f, "pip install {}", packages.join(" ")),
            Self::System(packages) => write!(f, "system install {}", packages.join(" ")),
            Self::Script(path) => write!(f, "script {}", path.display()),
        }
    }
}

/// Steps needed for `ticket`, in execution order: pip, system, script.
pub fn plan(ticket: &InstallTicket) -> Result<Vec<ProvisionStep>> {
    let mut steps = Vec::new();
    if !ticket.pip_requirements.is_empty() {
        steps.push(ProvisionStep::Pip(ticket.pip_requirements.clone()));
    }
    if !ticket.system_requirements.is_empty() {
        steps.push(ProvisionStep::System(ticket.system_requirements.clone()));
    }
    if let Some(script) = ticket.script.as_deref().filter(|s| !s.trim().is_empty()) {
        steps.push(ProvisionStep::Script(relative_script_path(&ticket.name, script)?));
    }
    Ok(steps)
}

fn relative_script_path(skill: &str, script: &str) -> Result<PathBuf> {
    let path = PathBuf::from(script);
    let safe = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(Error::provisioning_failed(
            skill,
            format!("setup script escapes the bundle: {script}"),
        ));
    }
    Ok(path)
}

/// Resolve the program and arguments for a step run inside `bundle`.
pub fn program_and_args(step: &ProvisionStep, bundle: &Path) -> (String, Vec<String>) {
    match step {
        ProvisionStep::Pip(packages) => {
            let mut args = vec!["install".to_string(), "--upgrade".to_string()];
            args.extend(packages.iter().cloned());
            ("pip3".into(), args)
        },
        ProvisionStep::System(packages) => {
            let mut args = vec!["install".to_string(), "-y".to_string()];
            args.extend(packages.iter().cloned());
            ("apt-get".into(), args)
        },
        ProvisionStep::Script(path) => (bundle.join(path).to_string_lossy().into_owned(), vec![]),
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Run one step for `skill` against the bundle staged at `bundle`.
    async fn run(&self, skill: &str, step: &ProvisionStep, bundle: &Path) -> Result<()>;
}

/// Runs every step as a child process.
#[derive(Debug, Default)]
pub struct CommandProvisioner;

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn run(&self, skill: &str, step: &ProvisionStep, bundle: &Path) -> Result<()> {
        if let ProvisionStep::Script(path) = step {
            make_executable(&bundle.join(path)).map_err(|e| {
                Error::provisioning_failed(skill, format!("cannot prepare setup script: {e}"))
            })?;
        }

        let (program, args) = program_and_args(step, bundle);
        debug!(skill, %step, "running provisioning step");
        let output = tokio::process::Command::new(&program)
            .args(&args)
            .current_dir(bundle)
            .output()
            .await
            .map_err(|e| Error::provisioning_failed(skill, format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::provisioning_failed(
                skill,
                format!("{step} exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        info!(skill, %step, "provisioning step done");
        Ok(())
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(path: &Path) -> std::io::Result<()> {
    std::fs::metadata(path).map(|_| ())
}
