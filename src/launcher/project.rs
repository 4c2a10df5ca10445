//! Project launches through the managed runtime.
//!
//! Project files run via `dotnet run --project`, built assemblies via
//! `dotnet <assembly>`. Any other command is started directly, which lets
//! hosts announce prebuilt native apphosts as projects.

use std::path::{Path, PathBuf};

use super::executable::resolve_program;
use super::process::LaunchPlan;
use super::LaunchContext;
use crate::models::session::SessionDescriptor;
use crate::{AppError, Result};

/// What a project session's command points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectTarget {
    /// `.csproj`/`.fsproj`/`.vbproj` project file.
    ProjectFile(PathBuf),
    /// Built managed assembly.
    Assembly(PathBuf),
    /// Anything else.
    Native(String),
}

impl ProjectTarget {
    /// Classify a command by its file extension.
    #[must_use]
    pub fn classify(command: &str) -> Self {
        let path = Path::new(command);
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        match extension.as_deref() {
            Some("csproj" | "fsproj" | "vbproj") => Self::ProjectFile(path.to_path_buf()),
            Some("dll") => Self::Assembly(path.to_path_buf()),
            _ => Self::Native(command.to_owned()),
        }
    }

    /// Program and argument list for this target.
    ///
    /// `runtime` is only consulted for managed targets.
    #[must_use]
    pub fn command_line(
        &self,
        runtime: &Path,
        launch_profile: Option<&str>,
        args: &[String],
    ) -> (PathBuf, Vec<String>) {
        match self {
            Self::ProjectFile(project) => {
                let mut argv = vec![
                    "run".to_owned(),
                    "--project".to_owned(),
                    project.to_string_lossy().into_owned(),
                ];
                if let Some(profile) = launch_profile {
                    argv.push("--launch-profile".into());
                    argv.push(profile.to_owned());
                }
                if !args.is_empty() {
                    argv.push("--".into());
                    argv.extend(args.iter().cloned());
                }
                (runtime.to_path_buf(), argv)
            }
            Self::Assembly(assembly) => {
                let mut argv = vec![assembly.to_string_lossy().into_owned()];
                argv.extend(args.iter().cloned());
                (runtime.to_path_buf(), argv)
            }
            Self::Native(command) => (PathBuf::from(command), args.to_vec()),
        }
    }
}

/// Locate the managed runtime CLI.
///
/// # Errors
///
/// Returns `AppError::Launch` if `cli` is not installed.
pub fn resolve_runtime(cli: &str) -> Result<PathBuf> {
    resolve_program(cli)
        .map_err(|_| AppError::Launch(format!("managed runtime '{cli}' not found on PATH")))
}

pub(super) fn plan(ctx: &LaunchContext, descriptor: &SessionDescriptor) -> Result<LaunchPlan> {
    let target = ProjectTarget::classify(&descriptor.command);
    let (program, args) = match &target {
        ProjectTarget::Native(command) => (resolve_program(command)?, descriptor.args.clone()),
        managed => {
            let runtime = resolve_runtime(&ctx.config.launcher.dotnet_cli)?;
            managed.command_line(
                &runtime,
                descriptor.launch_profile.as_deref(),
                &descriptor.args,
            )
        }
    };

    let mut plan = LaunchPlan::new(program);
    plan.args = args;
    plan.environment = ctx.environment_for(descriptor);
    plan.working_directory.clone_from(&descriptor.working_directory);
    Ok(plan)
}
