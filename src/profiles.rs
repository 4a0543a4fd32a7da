//! Saved firmware configuration profiles.
//!
//! Profiles are Kconfig `.config` files written by the profile editor; the
//! orchestrator only reads them, mainly to pick the DFU flash offset.

use std::path::PathBuf;

/// Known `_FLASH_START_*` symbols and the addresses they map to. Covers
/// both the `CONFIG_FLASH_START` and `CONFIG_STM32_FLASH_START` spellings.
const FLASH_OFFSETS: [(&str, &str); 7] = [
    ("_FLASH_START_800=y", "0x08000800"),
    ("_FLASH_START_2000=y", "0x08002000"),
    ("_FLASH_START_4000=y", "0x08004000"),
    ("_FLASH_START_8000=y", "0x08008000"),
    ("_FLASH_START_10000=y", "0x08010000"),
    ("_FLASH_START_20000=y", "0x08020000"),
    ("_FLASH_START_0=y", "0x08000000"),
];

pub const DEFAULT_FLASH_OFFSET: &str = "0x08000000";

/// Flash offset selected by a profile's saved config
pub fn extract_flash_offset(content: &str) -> &'static str {
    for (key, addr) in FLASH_OFFSETS {
        if content.contains(key) {
            return addr;
        }
    }
    DEFAULT_FLASH_OFFSET
}

pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn config_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.config"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.config_path(name).exists()
    }

    /// Profile names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let file = entry.file_name().to_string_lossy().into_owned();
                if let Some(name) = file.strip_suffix(".config") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        names
    }

    pub fn flash_offset(&self, name: &str) -> String {
        match std::fs::read_to_string(self.config_path(name)) {
            Ok(content) => extract_flash_offset(&content).to_string(),
            Err(_) => DEFAULT_FLASH_OFFSET.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_table_lookup() {
        assert_eq!(extract_flash_offset("CONFIG_FLASH_START_2000=y"), "0x08002000");
        assert_eq!(
            extract_flash_offset("CONFIG_STM32_FLASH_START_8000=y"),
            "0x08008000"
        );
        assert_eq!(extract_flash_offset("CONFIG_FLASH_START_10000=y"), "0x08010000");
        assert_eq!(extract_flash_offset("CONFIG_FLASH_START_0=y"), "0x08000000");
    }

    #[test]
    fn unknown_content_gets_the_default() {
        assert_eq!(extract_flash_offset("RANDOM_STUFF=y"), "0x08000000");
        assert_eq!(extract_flash_offset(""), "0x08000000");
    }

    #[test]
    fn disabled_symbols_do_not_match() {
        assert_eq!(
            extract_flash_offset("# CONFIG_FLASH_START_2000 is not set\nCONFIG_FLASH_START_0=y"),
            "0x08000000"
        );
    }
}
