// src/channel/hook.rs

//! Repository metadata hook
//!
//! After a content swap the channel can run an external command (typically
//! `createrepo_c --update {dir}`) so yum/dnf clients see repodata that matches
//! the new tree. The swap is already committed when the hook runs; a failing
//! hook is reported, never undone.

use crate::config::DIR_PLACEHOLDER;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// Result of running the metadata command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// No command configured
    Skipped,
    Succeeded,
    Failed(String),
}

impl HookOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Substitute `{dir}` in each argument with the content directory
pub fn expand_command(command: &[String], content_dir: &Path) -> Vec<String> {
    let dir = content_dir.display().to_string();
    command
        .iter()
        .map(|arg| arg.replace(DIR_PLACEHOLDER, &dir))
        .collect()
}

/// Run `command` against `content_dir`
pub fn run_metadata_command(command: Option<&[String]>, content_dir: &Path) -> HookOutcome {
    let Some(command) = command.filter(|c| !c.is_empty()) else {
        return HookOutcome::Skipped;
    };
    let argv = expand_command(command, content_dir);
    debug!("Running metadata command: {:?}", argv);

    let output = match Command::new(&argv[0]).args(&argv[1..]).output() {
        Ok(output) => output,
        Err(e) => {
            let reason = format!("failed to run {}: {}", argv[0], e);
            warn!("Metadata command failed: {}", reason);
            return HookOutcome::Failed(reason);
        }
    };

    if output.status.success() {
        HookOutcome::Succeeded
    } else {
        let reason = format!(
            "{} exited with {}: {}",
            argv[0],
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        warn!("Metadata command failed: {}", reason);
        HookOutcome::Failed(reason)
    }
}
