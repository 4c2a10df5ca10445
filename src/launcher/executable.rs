//! Plain executable launches.

use std::path::{Path, PathBuf};

use super::process::LaunchPlan;
use super::LaunchContext;
use crate::models::session::SessionDescriptor;
use crate::{AppError, Result};

/// Resolve `command` to a program path.
///
/// Bare names are looked up on `PATH`; anything with a path separator is
/// used as given.
///
/// # Errors
///
/// Returns `AppError::Launch` if a bare name is not on `PATH`.
pub fn resolve_program(command: &str) -> Result<PathBuf> {
    let path = Path::new(command);
    if path.components().count() > 1 || path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    which::which(command)
        .map_err(|err| AppError::Launch(format!("executable '{command}' not found: {err}")))
}

pub(super) fn plan(ctx: &LaunchContext, descriptor: &SessionDescriptor) -> Result<LaunchPlan> {
    let mut plan = LaunchPlan::new(resolve_program(&descriptor.command)?);
    plan.args.clone_from(&descriptor.args);
    plan.environment = ctx.environment_for(descriptor);
    plan.working_directory.clone_from(&descriptor.working_directory);
    Ok(plan)
}
