//! Configuration, override state, request files, and path resolution.
//!
//! INI scanner for config.ini sections. JSON override via serde. Request
//! files are empty markers: the CLI touches them, the daemon consumes
//! them on its next wakeup.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::ir::IrSettings;
use crate::solar::SolarParams;
use crate::state::Levels;

/// Resolved filesystem paths
#[derive(Clone)]
pub struct Paths {
    pub config_file: PathBuf,
    pub state_file: PathBuf,
    pub weather_file: PathBuf,
    pub override_file: PathBuf,
    pub sync_request: PathBuf,
    pub lightning_request: PathBuf,
    pub pid_file: PathBuf,
}

impl Paths {
    pub fn init() -> Result<Self, io::Error> {
        let home = std::env::var("HOME")
            .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;

        let config_dir = PathBuf::from(&home).join(".config").join("thalassa");
        fs::create_dir_all(&config_dir)?;

        Ok(Self {
            config_file: config_dir.join("config.ini"),
            state_file: config_dir.join("state.json"),
            weather_file: config_dir.join("weather.json"),
            override_file: config_dir.join("override.json"),
            sync_request: config_dir.join("sync.request"),
            lightning_request: config_dir.join("lightning.request"),
            pid_file: config_dir.join("daemon.pid"),
        })
    }
}

/// Everything config.ini can set.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub solar: SolarParams,
    pub lightning_enabled: bool,
    pub ir: IrSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            solar: SolarParams::default(),
            lightning_enabled: true,
            ir: IrSettings::default(),
        }
    }
}

/// Load settings from the INI config. Returns None when no [location]
/// section has been written yet -- the daemon refuses to guess where it is.
pub fn load_settings(paths: &Paths) -> Option<Settings> {
    let content = fs::read_to_string(&paths.config_file).ok()?;

    let mut settings = Settings::default();
    let mut have_location = false;
    let mut section = String::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if trimmed.starts_with('[') {
            section = trimmed.trim_matches(&['[', ']'][..]).to_string();
            continue;
        }

        let (key, value) = match trimmed.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => continue,
        };

        match (section.as_str(), key) {
            ("location", "latitude") => {
                if let Ok(v) = value.parse() {
                    settings.solar.latitude = v;
                    have_location = true;
                }
            }
            ("location", "longitude") => {
                if let Ok(v) = value.parse() {
                    settings.solar.longitude = v;
                }
            }
            ("location", "utc_offset") => {
                if let Ok(v) = value.parse() {
                    settings.solar.utc_offset_hours = v;
                }
            }
            ("solar", "summer_peak") => {
                if let Ok(v) = value.parse() {
                    settings.solar.summer_peak = v;
                }
            }
            ("solar", "winter_peak") => {
                if let Ok(v) = value.parse() {
                    settings.solar.winter_peak = v;
                }
            }
            ("solar", "noon_offset") => {
                if let Ok(v) = value.parse() {
                    settings.solar.noon_offset_hours = v;
                }
            }
            ("lighting", "lightning_enabled") => {
                settings.lightning_enabled = value == "true" || value == "1";
            }
            ("lighting", "ir_backend") => settings.ir.backend = value.to_string(),
            ("lighting", "ir_device") => settings.ir.device = value.to_string(),
            ("lighting", "ir_command") => settings.ir.command = Some(value.to_string()),
            _ => {}
        }
    }

    have_location.then_some(settings)
}

/// Save location to the INI config. Rewrites the whole file: the
/// location command owns it, everything else rides on defaults.
pub fn save_location(paths: &Paths, lat: f64, lon: f64, utc_offset: f64) -> Result<(), io::Error> {
    let content = format!(
        "[location]\nlatitude = {:.6}\nlongitude = {:.6}\nutc_offset = {:.2}\n",
        lat, lon, utc_offset
    );
    fs::write(&paths.config_file, content)
}

/// Manual target override
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OverrideState {
    pub active: bool,
    pub target: Levels,
}

/// Load override state from JSON
pub fn load_override(paths: &Paths) -> Option<OverrideState> {
    let content = fs::read_to_string(&paths.override_file).ok()?;
    if content.len() > 4096 {
        return None;
    }
    serde_json::from_str(&content).ok()
}

/// Save override state to JSON
pub fn save_override(paths: &Paths, ovr: &OverrideState) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(ovr)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    fs::write(&paths.override_file, json)
}

/// Clear override file
pub fn clear_override(paths: &Paths) {
    let _ = fs::remove_file(&paths.override_file);
}

/// Drop a request marker for the daemon.
pub fn touch_request(path: &Path) -> Result<(), io::Error> {
    fs::write(path, "")
}

/// Consume a request marker. Returns true when one was pending.
pub fn take_request(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(_) => false,
    }
}

/// Check if daemon process is alive via PID file
pub fn check_daemon_alive(paths: &Paths) -> bool {
    let content = match fs::read_to_string(&paths.pid_file) {
        Ok(c) => c,
        Err(_) => return false,
    };
    let pid: i32 = match content.trim().parse() {
        Ok(p) => p,
        Err(_) => return false,
    };
    if pid <= 0 {
        return false;
    }
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Write daemon PID to PID file
pub fn write_pid(paths: &Paths) -> Result<(), io::Error> {
    fs::write(&paths.pid_file, format!("{}\n", nix::unistd::getpid()))
}

/// Remove daemon PID file
pub fn remove_pid(paths: &Paths) {
    let _ = fs::remove_file(&paths.pid_file);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_store_path;

    fn test_paths(tag: &str) -> Paths {
        let dir = std::env::temp_dir().join(format!(
            "thalassa-cfg-{}-{}",
            tag,
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        Paths {
            config_file: dir.join("config.ini"),
            state_file: dir.join("state.json"),
            weather_file: dir.join("weather.json"),
            override_file: dir.join("override.json"),
            sync_request: dir.join("sync.request"),
            lightning_request: dir.join("lightning.request"),
            pid_file: dir.join("daemon.pid"),
        }
    }

    #[test]
    fn settings_require_a_location() {
        let paths = test_paths("noloc");
        fs::write(&paths.config_file, "[lighting]\nlightning_enabled = false\n").unwrap();
        assert!(load_settings(&paths).is_none());
    }

    #[test]
    fn location_round_trips_through_ini() {
        let paths = test_paths("loc");
        save_location(&paths, 38.28, -85.74, -5.0).unwrap();

        let settings = load_settings(&paths).unwrap();
        assert!((settings.solar.latitude - 38.28).abs() < 1e-6);
        assert!((settings.solar.longitude + 85.74).abs() < 1e-6);
        assert!((settings.solar.utc_offset_hours + 5.0).abs() < 1e-6);
        // Untouched sections keep their defaults.
        assert!(settings.lightning_enabled);
        assert_eq!(settings.ir.backend, "lirc");
    }

    #[test]
    fn full_ini_parses_every_section() {
        let paths = test_paths("full");
        fs::write(
            &paths.config_file,
            "# comment\n\
             [location]\n\
             latitude = 40.0\n\
             longitude = -80.0\n\
             utc_offset = -4\n\
             [solar]\n\
             summer_peak = 70\n\
             winter_peak = 25\n\
             noon_offset = -0.25\n\
             [lighting]\n\
             lightning_enabled = false\n\
             ir_backend = script\n\
             ir_command = /usr/local/bin/blast\n",
        )
        .unwrap();

        let settings = load_settings(&paths).unwrap();
        assert!((settings.solar.summer_peak - 70.0).abs() < 1e-6);
        assert!((settings.solar.winter_peak - 25.0).abs() < 1e-6);
        assert!((settings.solar.noon_offset_hours + 0.25).abs() < 1e-6);
        assert!(!settings.lightning_enabled);
        assert_eq!(settings.ir.backend, "script");
        assert_eq!(settings.ir.command.as_deref(), Some("/usr/local/bin/blast"));
    }

    #[test]
    fn override_round_trip_and_clear() {
        let paths = test_paths("ovr");
        let ovr = OverrideState {
            active: true,
            target: Levels::new(6, 3, 5, 4),
        };
        save_override(&paths, &ovr).unwrap();

        let loaded = load_override(&paths).unwrap();
        assert!(loaded.active);
        assert_eq!(loaded.target, Levels::new(6, 3, 5, 4));

        clear_override(&paths);
        assert!(load_override(&paths).is_none());
    }

    #[test]
    fn request_markers_are_consumed_once() {
        let paths = test_paths("req");
        assert!(!take_request(&paths.sync_request));
        touch_request(&paths.sync_request).unwrap();
        assert!(take_request(&paths.sync_request));
        assert!(!take_request(&paths.sync_request));
    }

    #[test]
    fn test_store_path_is_unique_per_tag() {
        assert_ne!(test_store_path("a"), test_store_path("b"));
    }
}
