use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub(crate) fn token(&self) -> &'static str {
        match self {
            Direction::Input => "in",
            Direction::Output => "out",
        }
    }
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeDetect {
    None,
    Rising,
    Falling,
    Both,
}

impl Default for EdgeDetect {
    fn default() -> Self {
        EdgeDetect::None
    }
}

impl EdgeDetect {
    pub(crate) fn token(&self) -> &'static str {
        match self {
            EdgeDetect::None => "none",
            EdgeDetect::Rising => "rising",
            EdgeDetect::Falling => "falling",
            EdgeDetect::Both => "both",
        }
    }
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ActiveLevel {
    Low,
    High,
}

impl ActiveLevel {
    // the sysfs active_low attribute inverts the line when set to 1
    pub(crate) fn active_low_token(&self) -> &'static str {
        match self {
            ActiveLevel::Low => "1",
            ActiveLevel::High => "0",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PinSettings {
    pub direction: Direction,
    pub edge: EdgeDetect,
    pub active_level: ActiveLevel,
    pub debounce_ms: u64,
}

impl Default for PinSettings {
    fn default() -> Self {
        Self {
            direction: Direction::Input,
            edge: EdgeDetect::Rising,
            active_level: ActiveLevel::High,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum WaitMode {
    Bounded { timeout_ms: u64 },
    Unbounded,
}

impl Default for WaitMode {
    fn default() -> Self {
        WaitMode::Bounded {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
        }
    }
}

impl WaitMode {
    pub(crate) fn timeout(&self) -> Option<Duration> {
        match self {
            WaitMode::Bounded { timeout_ms } => Some(Duration::from_millis(*timeout_ms)),
            WaitMode::Unbounded => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    pub wait: WaitMode,
    pub default_debounce_ms: u64,
    pub sysfs_root: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            wait: WaitMode::default(),
            default_debounce_ms: DEFAULT_DEBOUNCE_MS,
            sysfs_root: None,
        }
    }
}

impl MonitorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("Invalid config json: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_mode_parses_from_json() {
        let config: MonitorConfig = serde_json::from_str(
            r#"
            {
                "wait": { "mode": "bounded", "timeout_ms": 250 },
                "default_debounce_ms": 50,
                "sysfs_root": null
            }
            "#,
        )
        .expect("valid config");
        assert_eq!(config.wait, WaitMode::Bounded { timeout_ms: 250 });
        assert_eq!(config.wait.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.default_debounce_ms, 50);

        let config: MonitorConfig = serde_json::from_str(
            r#"
            {
                "wait": { "mode": "unbounded" },
                "default_debounce_ms": 100,
                "sysfs_root": "/sys/class/gpio"
            }
            "#,
        )
        .expect("valid config");
        assert_eq!(config.wait, WaitMode::Unbounded);
        assert_eq!(config.wait.timeout(), None);
    }

    #[test]
    fn default_wait_is_bounded() {
        let config = MonitorConfig::default();
        assert_eq!(
            config.wait,
            WaitMode::Bounded {
                timeout_ms: DEFAULT_WAIT_TIMEOUT_MS
            }
        );
    }
}
