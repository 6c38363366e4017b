//! Records exchanged between the toll gates, the back office and motorists.
//!
//! Rust names are English; the wire names follow the Italian vocabulary the
//! gate network already speaks (`targa`, `tratta`, `varco`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid plate '{0}': expected two letters, three digits, two letters")]
pub struct PlateError(pub String);

/// Licence plate in the `AA111AA` format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Plate(String);

impl Plate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(s: &str) -> bool {
        let b = s.as_bytes();
        b.len() == 7
            && b[..2].iter().all(u8::is_ascii_uppercase)
            && b[2..5].iter().all(u8::is_ascii_digit)
            && b[5..].iter().all(u8::is_ascii_uppercase)
    }
}

impl FromStr for Plate {
    type Err = PlateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if Self::is_valid(s) {
            Ok(Plate(s.to_string()))
        } else {
            Err(PlateError(s.to_string()))
        }
    }
}

impl TryFrom<String> for Plate {
    type Error = PlateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(Plate(value))
        } else {
            Err(PlateError(value))
        }
    }
}

impl From<Plate> for String {
    fn from(plate: Plate) -> Self {
        plate.0
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is calling. Set by the authenticating proxy in front of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "operatore")]
    Operator,
    #[serde(rename = "varco")]
    GateDevice,
    #[serde(rename = "automobilista")]
    Motorist,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "operatore",
            Role::GateDevice => "varco",
            Role::Motorist => "automobilista",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operatore" => Ok(Role::Operator),
            "varco" => Ok(Role::GateDevice),
            "automobilista" => Ok(Role::Motorist),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub id: i64,
    #[serde(rename = "autostrada")]
    pub highway: String,
    pub km: f64,
    pub smart: bool,
    #[serde(rename = "pioggia")]
    pub raining: bool,
}

/// Ordered entry/exit pair on one highway. `distance` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: i64,
    #[serde(rename = "varco_in")]
    pub entry_gate_id: i64,
    #[serde(rename = "varco_out")]
    pub exit_gate_id: i64,
    #[serde(rename = "distanza")]
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleType {
    pub id: i64,
    #[serde(rename = "tipo")]
    pub name: String,
    #[serde(rename = "limite_velocita")]
    pub speed_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    #[serde(rename = "targa")]
    pub plate: Plate,
    #[serde(rename = "tipo_veicolo")]
    pub vehicle_type_id: i64,
    #[serde(rename = "utente")]
    pub owner_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transit {
    pub id: i64,
    #[serde(rename = "targa")]
    pub plate: Plate,
    #[serde(rename = "tratta")]
    pub route_id: i64,
    #[serde(rename = "data_in")]
    pub entry_at: DateTime<Utc>,
    #[serde(rename = "data_out")]
    pub exit_at: DateTime<Utc>,
    #[serde(rename = "velocita_media")]
    pub average_speed: f64,
    #[serde(rename = "delta_velocita")]
    pub speed_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fine {
    pub id: i64,
    #[serde(rename = "transito")]
    pub transit_id: i64,
    #[serde(rename = "uuid_pagamento")]
    pub payment_id: String,
    #[serde(rename = "importo")]
    pub amount: f64,
}

/// Weather on a route, as reported by its two gates right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weather {
    #[serde(rename = "pioggia")]
    Rain,
    #[serde(rename = "nessuna pioggia")]
    Clear,
}

impl Weather {
    /// Rain only counts when both ends of the route report it.
    pub fn from_gates(entry: &Gate, exit: &Gate) -> Self {
        if entry.raining && exit.raining {
            Weather::Rain
        } else {
            Weather::Clear
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSummary {
    pub id: i64,
    #[serde(rename = "autostrada")]
    pub highway: String,
    pub km: f64,
}

impl From<&Gate> for GateSummary {
    fn from(gate: &Gate) -> Self {
        GateSummary {
            id: gate.id,
            highway: gate.highway.clone(),
            km: gate.km,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub id: i64,
    #[serde(rename = "distanza")]
    pub distance: f64,
    #[serde(rename = "varco_in")]
    pub entry_gate: GateSummary,
    #[serde(rename = "varco_out")]
    pub exit_gate: GateSummary,
}

/// A fine joined with its transit, route and gates. This is what fine
/// listings return and what payment documents are printed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineReport {
    pub id: i64,
    #[serde(rename = "importo")]
    pub amount: f64,
    #[serde(rename = "uuid_pagamento")]
    pub payment_id: String,
    #[serde(rename = "condizioni_meteo")]
    pub weather: Weather,
    #[serde(rename = "transito")]
    pub transit: Transit,
    #[serde(rename = "tratta")]
    pub route: RouteSummary,
}

pub mod timestamp {
    //! ISO-8601 timestamps. Zone-less values are read as UTC.

    use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, de::Error};

    /// Instants are stored with millisecond resolution.
    pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
        at.trunc_subsecs(3)
    }

    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(dt.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
                return Some(naive.and_utc());
            }
        }
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid ISO-8601 timestamp '{raw}'")))
    }
}
