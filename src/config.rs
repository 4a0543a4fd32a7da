//! Runtime paths, resolved once at startup from the environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fleet_transport::{FlashMethod, ToolPaths};

/// All on-disk locations the manager works with
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Klipper source tree (build system, canbus_query script)
    pub klipper_dir: PathBuf,
    /// Katapult tree (flashtool script)
    pub katapult_dir: PathBuf,
    /// Persistent state: fleet registry, profiles, artifacts
    pub data_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub artifacts_dir: PathBuf,
}

fn expand(value: &str) -> PathBuf {
    let path = if let Some(rest) = value.strip_prefix("~/") {
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(value),
        }
    } else {
        PathBuf::from(value)
    };
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => expand(&v),
        _ => expand(default),
    }
}

impl AppPaths {
    /// Resolve from `KLIPPER_DIR`, `KATAPULT_DIR` and `DATA_DIR`, creating
    /// the data directories if needed.
    pub fn from_env() -> Result<Self> {
        let klipper_dir = env_path("KLIPPER_DIR", "~/klipper");
        let katapult_dir = env_path("KATAPULT_DIR", "~/katapult");
        let data_dir = env_path("DATA_DIR", "~/printer_data/config/klipperfleet");
        let profiles_dir = data_dir.join("profiles");
        let artifacts_dir = data_dir.join("artifacts");

        std::fs::create_dir_all(&profiles_dir)
            .with_context(|| format!("creating {}", profiles_dir.display()))?;
        std::fs::create_dir_all(&artifacts_dir)
            .with_context(|| format!("creating {}", artifacts_dir.display()))?;

        Ok(Self {
            klipper_dir,
            katapult_dir,
            data_dir,
            profiles_dir,
            artifacts_dir,
        })
    }

    /// Rooted at an explicit data directory (tests)
    pub fn rooted(klipper_dir: &Path, katapult_dir: &Path, data_dir: &Path) -> Result<Self> {
        let profiles_dir = data_dir.join("profiles");
        let artifacts_dir = data_dir.join("artifacts");
        std::fs::create_dir_all(&profiles_dir)?;
        std::fs::create_dir_all(&artifacts_dir)?;
        Ok(Self {
            klipper_dir: klipper_dir.to_path_buf(),
            katapult_dir: katapult_dir.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
            profiles_dir,
            artifacts_dir,
        })
    }

    pub fn tool_paths(&self) -> ToolPaths {
        ToolPaths {
            klipper_dir: self.klipper_dir.clone(),
            katapult_dir: self.katapult_dir.clone(),
        }
    }

    pub fn fleet_file(&self) -> PathBuf {
        self.data_dir.join("fleet.json")
    }

    /// Built firmware image for a profile: host MCUs flash the ELF, real
    /// MCUs the raw binary.
    pub fn artifact(&self, profile: &str, method: FlashMethod) -> PathBuf {
        let ext = if method == FlashMethod::Linux {
            "elf"
        } else {
            "bin"
        };
        self.artifacts_dir.join(format!("{profile}.{ext}"))
    }

    pub fn build_info_file(&self, profile: &str) -> PathBuf {
        self.artifacts_dir.join(format!("{profile}.build_info.json"))
    }
}
