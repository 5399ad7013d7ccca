use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// integer identity of a sensor, stable for the session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(pub i64);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// one point of a sensor's history, as served by the gateway
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// unix seconds
    pub timestamp: i64,
    pub temperature: f64,
    pub humidity: f64,
    pub luminosity: f64,
    pub light_on: bool,
}

/// body of `POST /sensors/{id}`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightCommand {
    pub light_on: bool,
}

/// what the gateway answers to a light command
///
/// a full reading can be merged into the cached history. a bare state carries
/// no timestamp, so the history has to be refetched instead.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LightAck {
    Reading(Reading),
    State(LightCommand),
}

impl LightAck {
    pub fn light_on(&self) -> bool {
        match self {
            LightAck::Reading(r) => r.light_on,
            LightAck::State(s) => s.light_on,
        }
    }
}

/// derived light state of a sensor; never stored, always computed from the
/// last reading
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LightStatus {
    #[default]
    Unknown,
    On,
    Off,
}

impl LightStatus {
    pub fn from_last_reading(last: Option<&Reading>) -> Self {
        match last {
            None => LightStatus::Unknown,
            Some(r) if r.light_on => LightStatus::On,
            Some(_) => LightStatus::Off,
        }
    }
}

impl fmt::Display for LightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LightStatus::Unknown => "unknown",
            LightStatus::On => "on",
            LightStatus::Off => "off",
        })
    }
}

/// date bounds for `GET /sensors/{id}/readings`
///
/// the gateway defaults to 2000-01-01..2100-01-01 when a bound is missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadingsWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl ReadingsWindow {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(start) = self.start {
            pairs.push(("start", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = self.end {
            pairs.push(("end", end.format("%Y-%m-%d").to_string()));
        }
        pairs
    }
}
