use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Language a booking's notices are rendered in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Zh,
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zh" => Ok(Language::Zh),
            "en" => Ok(Language::En),
            other => Err(format!("unknown language: {other}")),
        }
    }
}

/// The persisted record. Timestamps are kept as stored: new records always
/// hold ISO-8601 UTC, legacy rows may hold `M/D/YYYY, h:mm:ss A`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub appointment_time: String,
    pub request_time: String,
    pub name: String,
    pub email: String,
    pub wechat_id: String,
    pub topic: String,
    pub language: Language,
}

/// A booking submission as it arrives on the wire. Every field is optional
/// here so validation can report all missing fields at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    #[serde(default, alias = "appointmentTime")]
    pub datetime: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub wechat_id: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub language: Option<Language>,
}

/// A booking identifier that may arrive as a JSON string or number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdParam {
    Text(String),
    Number(serde_json::Number),
}

impl IdParam {
    /// `None` when the id is an empty string.
    pub fn into_id(self) -> Option<String> {
        let id = match self {
            IdParam::Text(s) => s,
            IdParam::Number(n) => n.to_string(),
        };
        if id.trim().is_empty() { None } else { Some(id) }
    }
}

/// One generated slot with its booked flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStatus {
    pub time: DateTime<Utc>,
    pub is_booked: bool,
}
