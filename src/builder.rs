//! Firmware build driver around the Klipper Makefile.
//!
//! One builder per process: the vendor tree has a single `.config` scratch
//! slot, so builds are inherently serial.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fleet_transport::process::{run_command_in, stream_command_in, LogSink};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// make clean / olddefconfig are bounded; the build itself is not
const BUILD_STEP_TIMEOUT: Duration = Duration::from_secs(60);
const GIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Version metadata captured for a successful build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub date: String,
    pub built_at: String,
}

pub struct BuildManager {
    klipper_dir: PathBuf,
    artifacts_dir: PathBuf,
    last_build_info: parking_lot::Mutex<HashMap<String, BuildInfo>>,
}

impl BuildManager {
    pub fn new(klipper_dir: PathBuf, artifacts_dir: PathBuf) -> Self {
        Self {
            klipper_dir,
            artifacts_dir,
            last_build_info: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    async fn git_line(&self, args: &[&str]) -> Option<String> {
        match run_command_in(&self.klipper_dir, "git", args, Some(GIT_TIMEOUT)).await {
            Ok(out) if out.success() => {
                let line = out.stdout.trim().to_string();
                (!line.is_empty()).then_some(line)
            }
            _ => None,
        }
    }

    /// Klipper tree git version: (version, commit, date), "unknown" when git
    /// cannot answer.
    pub async fn klipper_version(&self) -> (String, String, String) {
        let version = self
            .git_line(&["describe", "--always", "--tags", "--dirty"])
            .await
            .unwrap_or_else(|| "unknown".to_string());
        let commit = self
            .git_line(&["rev-parse", "HEAD"])
            .await
            .map(|c| c.chars().take(12).collect())
            .unwrap_or_else(|| "unknown".to_string());
        let date = self
            .git_line(&["log", "-1", "--format=%ci"])
            .await
            .unwrap_or_else(|| "unknown".to_string());
        (version, commit, date)
    }

    /// Build info of the most recent successful build for a profile, from
    /// memory or the persisted sidecar file.
    pub fn last_build_info(&self, profile: &str) -> Option<BuildInfo> {
        if let Some(info) = self.last_build_info.lock().get(profile) {
            return Some(info.clone());
        }
        let path = self
            .artifacts_dir
            .join(format!("{profile}.build_info.json"));
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Run a full build for one profile, streaming output to the sink.
    /// Failures are reported in-band with `!!!` markers; callers classify
    /// from the log.
    pub async fn run_build(&self, config_path: &Path, profile: &str, sink: &LogSink) {
        // The Makefile mishandles spaces in KCONFIG_CONFIG; stage the
        // profile into the tree's standard .config slot instead.
        let tmp_config = self.klipper_dir.join(".config");
        if let Err(e) = tokio::fs::copy(config_path, &tmp_config).await {
            sink.send(format!("!!! Error copying config: {e}\n"));
            return;
        }

        sink.send(">>> Cleaning build environment...\n".to_string());
        if let Err(e) =
            run_command_in(&self.klipper_dir, "make", &["clean"], Some(BUILD_STEP_TIMEOUT)).await
        {
            sink.send(format!("!!! Error during make clean: {e}\n"));
            return;
        }

        sink.send(">>> Validating configuration (olddefconfig)...\n".to_string());
        if let Err(e) = run_command_in(
            &self.klipper_dir,
            "make",
            &["olddefconfig"],
            Some(BUILD_STEP_TIMEOUT),
        )
        .await
        {
            sink.send(format!("!!! Error during make olddefconfig: {e}\n"));
            return;
        }

        sink.send(">>> Starting build...\n".to_string());
        let code = match stream_command_in(Some(&self.klipper_dir), "make", &[], sink).await {
            Ok(code) => code,
            Err(e) => {
                sink.send(format!("!!! Error during build: {e}\n"));
                return;
            }
        };

        if code != Some(0) {
            sink.send(format!(
                "!!! Build failed with return code {}\n",
                code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
            ));
            return;
        }

        sink.send(">>> Build successful!\n".to_string());

        let (version, commit, date) = self.klipper_version().await;
        sink.send(format!(">>> Klipper version: {version} ({commit})\n"));

        for ext in ["bin", "elf"] {
            let src = self.klipper_dir.join("out").join(format!("klipper.{ext}"));
            if src.exists() {
                let dst = self.artifacts_dir.join(format!("{profile}.{ext}"));
                match tokio::fs::copy(&src, &dst).await {
                    Ok(_) => sink.send(format!(">>> Saved artifact: {profile}.{ext}\n")),
                    Err(e) => sink.send(format!("!!! Error saving artifact {profile}.{ext}: {e}\n")),
                }
            }
        }

        let info = BuildInfo {
            version,
            commit,
            date,
            built_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        self.last_build_info
            .lock()
            .insert(profile.to_string(), info.clone());

        let info_path = self
            .artifacts_dir
            .join(format!("{profile}.build_info.json"));
        match serde_json::to_string_pretty(&info) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&info_path, json).await {
                    warn!("failed to persist build info for {profile}: {e}");
                }
            }
            Err(e) => warn!("failed to serialise build info for {profile}: {e}"),
        }
    }
}
