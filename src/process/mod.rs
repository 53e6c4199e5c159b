use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use log::{debug, info, warn};
use sysinfo::System;

use crate::config::LauncherConfig;
use crate::env;
use crate::error::LauncherError;
use crate::identity::Identity;

pub mod command;

pub use command::{CommandBuilder, LaunchOptions, VersionProfileBuilder};

/// Share of physical memory the game heap may claim.
const MAX_HEAP_SHARE: f64 = 0.75;

#[derive(Clone)]
pub struct ProcessLauncher {
    builder: Arc<dyn CommandBuilder>,
    app_dir: PathBuf,
}

impl ProcessLauncher {
    pub fn new(builder: Arc<dyn CommandBuilder>, app_dir: PathBuf) -> Self {
        Self { builder, app_dir }
    }

    /// Build the command for the configured version and start it. The process
    /// is not supervised after it starts.
    pub fn launch(
        &self,
        config: &LauncherConfig,
        identity: &Identity,
    ) -> Result<Child, LauncherError> {
        let mut command = self.command_line(config, identity)?;
        let program = command.remove(0);

        info!(
            "launch: starting version {} for player {}",
            config.version_id(),
            identity.username
        );
        debug!("launch: {} {}", program, command.join(" "));

        let mut cmd = Command::new(&program);
        cmd.args(&command)
            .current_dir(&config.game_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            // CREATE_NO_WINDOW
            cmd.creation_flags(0x08000000);
        }

        let child = cmd
            .spawn()
            .map_err(|e| LauncherError::Launch(format!("failed to start {program}: {e}")))?;
        info!("launch: process started (pid {})", child.id());
        Ok(child)
    }

    /// The full command line with element 0 replaced by the resolved Java.
    pub fn command_line(
        &self,
        config: &LauncherConfig,
        identity: &Identity,
    ) -> Result<Vec<String>, LauncherError> {
        let java = resolve_java(config, &self.app_dir)?;
        let options = LaunchOptions {
            username: identity.username.clone(),
            uuid: identity.uuid.clone(),
            token: identity.token.clone(),
            jvm_arguments: clamp_heap_arguments(&config.jvm_arguments, total_memory_bytes()),
            launcher_name: config.launcher_name.clone(),
            launcher_version: env!("CARGO_PKG_VERSION").into(),
        };

        let mut command = self
            .builder
            .build(&config.version_id(), &config.game_dir, &options)?;
        if command.is_empty() {
            return Err(LauncherError::Launch("command builder returned nothing".into()));
        }
        command[0] = java.display().to_string();
        Ok(command)
    }
}

/// Explicit path, then the bundled runtime, then `JAVA_HOME`, then `PATH`.
pub fn resolve_java(config: &LauncherConfig, app_dir: &Path) -> Result<PathBuf, LauncherError> {
    if let Some(java) = &config.java_path {
        if !java.exists() {
            warn!("launch: configured Java missing at {}", java.display());
            return Err(LauncherError::Launch(format!(
                "Java runtime not found at {}",
                java.display()
            )));
        }
        return Ok(java.clone());
    }

    let bundled = env::java_binary(&env::runtime_dir(app_dir));
    if bundled.exists() {
        return Ok(bundled);
    }

    if let Some(home) = std::env::var_os("JAVA_HOME") {
        let java = env::java_binary(Path::new(&home));
        if java.exists() {
            debug!("launch: using JAVA_HOME runtime {}", java.display());
            return Ok(java);
        }
    }

    debug!("launch: falling back to java on PATH");
    Ok(PathBuf::from("java"))
}

fn total_memory_bytes() -> Option<u64> {
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory();
    (total > 0).then_some(total)
}

/// Keep `-Xmx` within [`MAX_HEAP_SHARE`] of physical memory and `-Xms` at or
/// below `-Xmx`. Other arguments pass through untouched.
pub fn clamp_heap_arguments(args: &[String], total_memory: Option<u64>) -> Vec<String> {
    let mut out: Vec<String> = args.to_vec();

    let mut max_heap = None;
    if let Some(index) = out.iter().position(|a| a.starts_with("-Xmx"))
        && let Some(requested) = parse_memory_size(&out[index][4..])
    {
        let mut effective = requested;
        if let Some(total) = total_memory {
            let cap = (total as f64 * MAX_HEAP_SHARE) as u64;
            if requested > cap {
                effective = cap;
                out[index] = format!("-Xmx{}M", cap / (1024 * 1024));
                warn!(
                    "launch: {} exceeds {:.0}% of system memory; using {}",
                    args[index],
                    MAX_HEAP_SHARE * 100.0,
                    out[index]
                );
            }
        }
        max_heap = Some((effective, out[index][4..].to_owned()));
    }

    if let Some((max_bytes, max_text)) = max_heap
        && let Some(index) = out.iter().position(|a| a.starts_with("-Xms"))
        && parse_memory_size(&out[index][4..]).is_some_and(|initial| initial > max_bytes)
    {
        out[index] = format!("-Xms{max_text}");
    }

    out
}

/// JVM size syntax: digits with an optional k/m/g suffix.
fn parse_memory_size(value: &str) -> Option<u64> {
    let (digits, multiplier) = match value.chars().last()? {
        'k' | 'K' => (&value[..value.len() - 1], 1024),
        'm' | 'M' => (&value[..value.len() - 1], 1024 * 1024),
        'g' | 'G' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}
