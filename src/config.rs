use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::{debug, info, warn};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Resolutions listed in the mouse summary.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DpiTable {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}

impl Default for DpiTable {
    fn default() -> Self {
        Self {
            min: 400,
            max: 2500,
            step: 200,
        }
    }
}

impl DpiTable {
    pub fn resolutions(&self) -> impl Iterator<Item = u32> {
        (self.min..=self.max).step_by(self.step.max(1) as usize)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Pause between reports that starts a new mouse measurement.
    pub idle_reset_ms: u64,
    pub dpi_table: DpiTable,
    pub dmi_modalias: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            idle_reset_ms: 3000,
            dpi_table: DpiTable::default(),
            dmi_modalias: PathBuf::from("/sys/class/dmi/id/modalias"),
        }
    }
}

fn config_dir() -> Option<PathBuf> {
    let home = UserDirs::new()?.home_dir().to_path_buf();
    Some(home.join(".config").join("evdev-probe"))
}

pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

impl ProbeConfig {
    /// Loads `explicit` if given (it must exist), otherwise the per-user file
    /// if present, otherwise the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) if p.exists() => p,
                _ => {
                    debug!("no config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let txt = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let cfg = Self::parse(&txt).with_context(|| format!("in {}", path.display()))?;
        info!("loaded config from {}", path.display());
        Ok(cfg)
    }

    pub fn parse(txt: &str) -> Result<Self> {
        let cfg: ProbeConfig = toml::from_str(txt).map_err(|e| anyhow!("failed to parse: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.idle_reset_ms == 0 {
            return Err(anyhow!("idle_reset_ms must be positive"));
        }
        if self.idle_reset_ms.checked_mul(1000).is_none() {
            return Err(anyhow!("idle_reset_ms {} is out of range", self.idle_reset_ms));
        }
        let t = &self.dpi_table;
        if t.step == 0 {
            return Err(anyhow!("dpi_table.step must be positive"));
        }
        if t.min == 0 || t.min > t.max {
            return Err(anyhow!(
                "dpi_table range {}..{} is empty or starts at zero",
                t.min,
                t.max
            ));
        }
        Ok(())
    }

    pub fn idle_reset_us(&self) -> u64 {
        self.idle_reset_ms.saturating_mul(1000)
    }

    /// The machine's DMI modalias, if readable.
    pub fn read_dmi_modalias(&self) -> Option<String> {
        match fs::read_to_string(&self.dmi_modalias) {
            Ok(s) => Some(s.trim().to_string()),
            Err(e) => {
                warn!("cannot read {}: {e}", self.dmi_modalias.display());
                None
            }
        }
    }
}

/// Explains a permission failure on open.
pub fn permission_hint() -> String {
    let user = whoami::username();
    if in_group(&user, "input", &fs::read_to_string("/etc/group").unwrap_or_default()) {
        format!("User '{user}' is in the input group; try running as root")
    } else {
        format!(
            "User '{user}' is not in the input group: sudo usermod -aG input $USER && newgrp input"
        )
    }
}

fn in_group(user: &str, group: &str, etc_group: &str) -> bool {
    etc_group.lines().any(|line| {
        let mut fields = line.split(':');
        fields.next() == Some(group)
            && fields
                .nth(2)
                .unwrap_or("")
                .split(',')
                .any(|u| u.trim() == user)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tool_behaviour() {
        let cfg = ProbeConfig::parse("").unwrap();
        assert_eq!(cfg, ProbeConfig::default());
        assert_eq!(cfg.idle_reset_us(), 3_000_000);
        let dpis: Vec<u32> = cfg.dpi_table.resolutions().collect();
        assert_eq!(dpis.first(), Some(&400));
        assert_eq!(dpis.last(), Some(&2400));
    }

    #[test]
    fn partial_tables_keep_defaults() {
        let cfg = ProbeConfig::parse(
            r#"
            idle_reset_ms = 1500
            [dpi_table]
            max = 3200
            "#,
        )
        .unwrap();
        assert_eq!(cfg.idle_reset_us(), 1_500_000);
        assert_eq!(cfg.dpi_table.min, 400);
        assert_eq!(cfg.dpi_table.resolutions().last(), Some(3200));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(ProbeConfig::parse("idle_reset_ms = 0").is_err());
        assert!(ProbeConfig::parse("[dpi_table]\nstep = 0").is_err());
        assert!(ProbeConfig::parse("[dpi_table]\nmin = 3000\nmax = 400").is_err());
        assert!(ProbeConfig::parse("idle_reset_ms = \"soon\"").is_err());
        assert!(ProbeConfig::parse("idle_reset_ms = 9000000000000000000").is_err());
    }

    #[test]
    fn huge_idle_reset_does_not_overflow() {
        let cfg = ProbeConfig {
            idle_reset_ms: u64::MAX,
            ..ProbeConfig::default()
        };
        assert_eq!(cfg.idle_reset_us(), u64::MAX);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ProbeConfig::load(Some(Path::new("/nonexistent/evdev-probe.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/evdev-probe.toml"));
    }

    #[test]
    fn group_membership() {
        let etc = "root:x:0:\ninput:x:104:alice,bob\nvideo:x:44:carol\n";
        assert!(in_group("bob", "input", etc));
        assert!(!in_group("carol", "input", etc));
        assert!(!in_group("root", "input", etc));
    }
}
