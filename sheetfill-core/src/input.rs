//! Calculation input record
//!
//! The record is made of four fixed groups. `GM`, `M1` and `M2` describe one
//! machine each and carry an `Aktiv` flag; `GK` holds calculation-wide
//! parameters. Every field is addressed in the template as `{group}_{field}`.

use crate::error::{ReportError, Result};
use chrono::Local;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Name of the activity flag shared by the machine groups
pub const ACTIVE_FLAG: &str = "Aktiv";

const MAX_BASE_NAME_LEN: usize = 64;
const MAX_TEXT_LEN: usize = 200;

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("name pattern is valid"));

/// The four input groups, in projection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    Gm,
    M1,
    M2,
    Gk,
}

impl Group {
    pub const ALL: [Group; 4] = [Group::Gm, Group::M1, Group::M2, Group::Gk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Gm => "GM",
            Group::M1 => "M1",
            Group::M2 => "M2",
            Group::Gk => "GK",
        }
    }

    /// Whether the group carries an `Aktiv` flag
    pub fn has_active_flag(&self) -> bool {
        !matches!(self, Group::Gk)
    }

    /// Template symbol for a field of this group
    pub fn symbol(&self, field: &str) -> String {
        format!("{}_{}", self.as_str(), field)
    }

    /// Field names of this group in template order
    pub fn field_names(&self) -> &'static [&'static str] {
        if self.has_active_flag() {
            &MACHINE_FIELDS
        } else {
            &CALCULATION_FIELDS
        }
    }

    /// Every symbol a template must define for this group
    pub fn symbols(&self) -> Vec<String> {
        self.field_names().iter().map(|f| self.symbol(f)).collect()
    }
}

const MACHINE_FIELDS: [&str; 12] = [
    ACTIVE_FLAG,
    "Name",
    "Anschaffungspreis",
    "Nutzungsdauer",
    "Restwert",
    "Zinssatz",
    "Instandhaltung",
    "Raumbedarf",
    "Raumkosten",
    "Energieverbrauch",
    "Energiekosten",
    "Laufzeit",
];

const CALCULATION_FIELDS: [&str; 5] = [
    "Personalkosten",
    "Arbeitstage",
    "Schichten",
    "StundenProSchicht",
    "Gemeinkostenzuschlag",
];

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Flag semantics: only the number `0` is inactive
    pub fn is_inactive(&self) -> bool {
        matches!(self, FieldValue::Number(n) if *n == 0.0)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(t) => f.write_str(t),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// Cost and consumption parameters of one machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct MachineParams {
    /// 1 when the machine takes part in the calculation, 0 otherwise;
    /// JSON `true`/`false` are accepted as well
    #[serde(deserialize_with = "deserialize_flag")]
    pub aktiv: u8,
    pub name: String,
    /// Acquisition price in EUR
    pub anschaffungspreis: f64,
    /// Useful life in years
    pub nutzungsdauer: f64,
    /// Residual value in EUR
    pub restwert: f64,
    /// Imputed interest rate in percent
    pub zinssatz: f64,
    /// Maintenance per year in EUR
    pub instandhaltung: f64,
    /// Floor space in m²
    pub raumbedarf: f64,
    /// Space cost in EUR per m² and month
    pub raumkosten: f64,
    /// Power draw in kW
    pub energieverbrauch: f64,
    /// Energy price in EUR per kWh
    pub energiekosten: f64,
    /// Machine hours per year
    pub laufzeit: f64,
}

fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(u8),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(flag) => u8::from(flag),
        Flag::Number(n) => n,
    })
}

impl MachineParams {
    pub fn is_active(&self) -> bool {
        self.aktiv != 0
    }

    /// Fields in template order, keyed by their serialized names
    pub fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        let values = [
            FieldValue::Number(f64::from(self.aktiv)),
            FieldValue::Text(self.name.clone()),
            self.anschaffungspreis.into(),
            self.nutzungsdauer.into(),
            self.restwert.into(),
            self.zinssatz.into(),
            self.instandhaltung.into(),
            self.raumbedarf.into(),
            self.raumkosten.into(),
            self.energieverbrauch.into(),
            self.energiekosten.into(),
            self.laufzeit.into(),
        ];
        MACHINE_FIELDS.into_iter().zip(values).collect()
    }
}

/// Calculation-wide parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct CalculationParams {
    /// Labour cost in EUR per hour
    pub personalkosten: f64,
    pub arbeitstage: f64,
    pub schichten: f64,
    pub stunden_pro_schicht: f64,
    /// Overhead surcharge in percent
    pub gemeinkostenzuschlag: f64,
}

impl CalculationParams {
    pub fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        let values = [
            self.personalkosten,
            self.arbeitstage,
            self.schichten,
            self.stunden_pro_schicht,
            self.gemeinkostenzuschlag,
        ];
        CALCULATION_FIELDS
            .into_iter()
            .zip(values.map(FieldValue::Number))
            .collect()
    }
}

/// The full input of one report request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalculationInput {
    #[serde(rename = "GM")]
    pub gm: MachineParams,
    #[serde(rename = "M1")]
    pub m1: MachineParams,
    #[serde(rename = "M2")]
    pub m2: MachineParams,
    #[serde(rename = "GK")]
    pub gk: CalculationParams,
}

impl CalculationInput {
    /// Machine parameters of a flagged group, `None` for `GK`
    pub fn machine(&self, group: Group) -> Option<&MachineParams> {
        match group {
            Group::Gm => Some(&self.gm),
            Group::M1 => Some(&self.m1),
            Group::M2 => Some(&self.m2),
            Group::Gk => None,
        }
    }

    /// Whether a group is active; groups without a flag are always active
    pub fn is_group_active(&self, group: Group) -> bool {
        self.machine(group).is_none_or(MachineParams::is_active)
    }

    /// Fields of a group in template order
    pub fn group_fields(&self, group: Group) -> Vec<(&'static str, FieldValue)> {
        match self.machine(group) {
            Some(machine) => machine.fields(),
            None => self.gk.fields(),
        }
    }

    /// Check the record before any template work starts
    pub fn validate(&self) -> Result<()> {
        for group in Group::ALL {
            if let Some(machine) = self.machine(group) {
                if machine.aktiv > 1 {
                    return Err(ReportError::InvalidInput(format!(
                        "{}.{} must be 0 or 1, got {}",
                        group, ACTIVE_FLAG, machine.aktiv
                    )));
                }
            }

            for (field, value) in self.group_fields(group) {
                match value {
                    FieldValue::Number(n) if !n.is_finite() => {
                        return Err(ReportError::InvalidInput(format!(
                            "{}.{} must be a finite number, got {}",
                            group, field, n
                        )));
                    }
                    FieldValue::Text(t) if t.chars().count() > MAX_TEXT_LEN => {
                        return Err(ReportError::InvalidInput(format!(
                            "{}.{} is longer than {} characters",
                            group, field, MAX_TEXT_LEN
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Reduce a caller-supplied name to `[A-Za-z0-9_-]`, or `None` if nothing is left
pub fn sanitize_base_name(hint: &str) -> Option<String> {
    let cleaned = UNSAFE_NAME_CHARS.replace_all(hint.trim(), "_");
    let cleaned: String = cleaned
        .trim_matches('_')
        .chars()
        .take(MAX_BASE_NAME_LEN)
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Timestamp-derived default name, e.g. `REPORT_20250101_120000`
pub fn default_base_name() -> String {
    format!("REPORT_{}", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Sanitized hint, falling back to the timestamp default
pub fn base_name(hint: Option<&str>) -> String {
    hint.and_then(sanitize_base_name)
        .unwrap_or_else(default_base_name)
}
