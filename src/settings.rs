use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::LevelFilter;

use crate::composite::{Arch, CompositeOpRegistry};
use crate::error::PaintResult;

/// Engine-wide settings persisted as `key=value` lines.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    /// Worker threads for the stroke scheduler (0 = available parallelism).
    pub worker_threads: usize,
    /// Force a composite dispatch arch instead of the detected one.
    pub composite_arch: Option<Arch>,
    pub log_level: LevelFilter,
    pub log_to_file: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            composite_arch: None,
            log_level: LevelFilter::Info,
            log_to_file: true,
        }
    }
}

impl EngineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/tilepaint/tilepaint.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\tilepaint\tilepaint.cfg
    /// On macOS:   ~/Library/Application Support/tilepaint/tilepaint.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("tilepaint");
            return Some(config_dir.join("tilepaint.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("tilepaint").join("tilepaint.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("tilepaint")
                    .join("tilepaint.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join("tilepaint.cfg")))
        }
    }

    /// Parse `key=value` lines. Unknown keys and unparsable values keep their
    /// defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "worker_threads" => {
                    if let Ok(n) = val.parse() {
                        s.worker_threads = n;
                    }
                }
                "composite_arch" => {
                    s.composite_arch = match val {
                        "" | "auto" => None,
                        other => match other.parse::<Arch>() {
                            Ok(arch) => Some(arch),
                            Err(e) => {
                                log::warn!("settings: {e}; using detected arch");
                                None
                            }
                        },
                    };
                }
                "log_level" => {
                    if let Ok(level) = val.parse() {
                        s.log_level = level;
                    }
                }
                "log_to_file" => s.log_to_file = val == "true",
                _ => log::debug!("settings: ignoring unknown key '{key}'"),
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        let arch = self.composite_arch.map_or("auto", |a| a.name());
        format!(
            "worker_threads={}\n\
             composite_arch={arch}\n\
             log_level={}\n\
             log_to_file={}\n",
            self.worker_threads,
            self.log_level.as_str().to_ascii_lowercase(),
            self.log_to_file,
        )
    }

    pub fn save_to(&self, path: &Path) -> PaintResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }

    /// Save to [`settings_path`](Self::settings_path).
    pub fn save(&self) -> PaintResult<()> {
        match Self::settings_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else { return Self::default() };
        Self::parse(&content)
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        Self::load_from(&path)
    }

    /// Registry for the configured arch. An arch the CPU lacks falls back to
    /// the detected one.
    pub fn registry(&self) -> Arc<CompositeOpRegistry> {
        match self.composite_arch {
            Some(arch) => match CompositeOpRegistry::for_arch(arch) {
                Some(registry) => Arc::new(registry),
                None => {
                    let global = CompositeOpRegistry::global();
                    log::warn!("composite arch {arch} not supported by this CPU; using {}", global.arch());
                    global
                }
            },
            None => CompositeOpRegistry::global(),
        }
    }
}
