use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::{parse_time_zone, SlotPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Policy(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::Policy(msg) => write!(f, "invalid business hours: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_file: PathBuf,
    pub admin_password: String,
    pub metrics_port: Option<u16>,
    pub policy: SlotPolicy,
    pub hide_past_slots: bool,
    pub bcc: Vec<String>,
}

impl Config {
    /// Read `SLOTBOOK_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests need not touch the real environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let time_zone = match get("SLOTBOOK_TIMEZONE") {
            Some(name) => parse_time_zone(&name).map_err(|_| ConfigError::Invalid {
                var: "SLOTBOOK_TIMEZONE",
                value: name,
            })?,
            None => SlotPolicy::default().time_zone,
        };
        let defaults = SlotPolicy::default();
        let policy = SlotPolicy {
            open_hour: parsed(&get, "SLOTBOOK_OPEN_HOUR", defaults.open_hour)?,
            close_hour: parsed(&get, "SLOTBOOK_CLOSE_HOUR", defaults.close_hour)?,
            break_start: parsed(&get, "SLOTBOOK_BREAK_START", defaults.break_start)?,
            break_end: parsed(&get, "SLOTBOOK_BREAK_END", defaults.break_end)?,
            interval_minutes: parsed(&get, "SLOTBOOK_INTERVAL_MINUTES", defaults.interval_minutes)?,
            time_zone,
        };
        validate_policy(&policy)?;

        let metrics_port = match get("SLOTBOOK_METRICS_PORT") {
            Some(_) => Some(parsed(&get, "SLOTBOOK_METRICS_PORT", 0u16)?),
            None => None,
        };

        Ok(Self {
            bind: get("SLOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&get, "SLOTBOOK_PORT", 3000)?,
            data_file: get("SLOTBOOK_DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/bookings.csv")),
            admin_password: get("SLOTBOOK_ADMIN_PASSWORD").unwrap_or_else(|| "slotbook".into()),
            metrics_port,
            policy,
            hide_past_slots: parsed(&get, "SLOTBOOK_HIDE_PAST_SLOTS", true)?,
            bcc: get("SLOTBOOK_BCC")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

fn parsed<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

pub fn validate_policy(p: &SlotPolicy) -> Result<(), ConfigError> {
    if p.close_hour > 24 || p.open_hour >= p.close_hour {
        return Err(ConfigError::Policy(format!(
            "open hour {} must be before close hour {} (max 24)",
            p.open_hour, p.close_hour
        )));
    }
    if p.break_start > p.break_end
        || (p.break_start < p.break_end
            && (p.break_start < p.open_hour || p.break_end > p.close_hour))
    {
        return Err(ConfigError::Policy(format!(
            "break {}-{} must lie within opening hours",
            p.break_start, p.break_end
        )));
    }
    if p.interval_minutes == 0 || 60 % p.interval_minutes != 0 {
        return Err(ConfigError::Policy(format!(
            "interval {} must divide an hour",
            p.interval_minutes
        )));
    }
    Ok(())
}
