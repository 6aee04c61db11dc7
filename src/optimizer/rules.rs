use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, IntoStaticStr};

pub const DEFAULT_POWER_FACTOR: f64 = 1.0;
pub const DEFAULT_VOLTAGE: f64 = 220.0;

/// Operational advice attached to a predicted hour.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr, IntoStaticStr, EnumIter,
)]
pub enum Recommendation {
    #[strum(serialize = "Reduce HVAC and lighting (low occupancy)")]
    #[serde(rename = "Reduce HVAC and lighting (low occupancy)")]
    ReduceHvacAndLighting,
    #[strum(serialize = "Lower thermostat")]
    #[serde(rename = "Lower thermostat")]
    LowerThermostat,
    #[strum(serialize = "Improve power factor correction")]
    #[serde(rename = "Improve power factor correction")]
    ImprovePowerFactor,
    #[strum(serialize = "Check voltage regulation")]
    #[serde(rename = "Check voltage regulation")]
    CheckVoltageRegulation,
    #[strum(serialize = "Optimize equipment scheduling")]
    #[serde(rename = "Optimize equipment scheduling")]
    OptimizeScheduling,
    #[strum(serialize = "Maintain current settings")]
    #[serde(rename = "Maintain current settings")]
    MaintainCurrentSettings,
}

/// Everything the ladder looks at for one hour of one building.
///
/// `occupancy` and `temperature` stay optional: an absent value never matches
/// the rule that reads it. Absent `power_factor` and `voltage` fall back to
/// nominal values.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RuleInput {
    pub predicted_energy: f64,
    pub occupancy: Option<f64>,
    pub temperature: Option<f64>,
    pub power_factor: Option<f64>,
    pub voltage: Option<f64>,
}

impl RuleInput {
    fn power_factor(&self) -> f64 {
        self.power_factor.unwrap_or(DEFAULT_POWER_FACTOR)
    }

    fn voltage(&self) -> f64 {
        self.voltage.unwrap_or(DEFAULT_VOLTAGE)
    }
}

type Rule = fn(&RuleInput) -> bool;

fn unoccupied(r: &RuleInput) -> bool {
    r.occupancy == Some(0.0) && r.predicted_energy > 20.0
}

fn overheated(r: &RuleInput) -> bool {
    r.temperature.is_some_and(|t| t > 24.0) && r.predicted_energy > 30.0
}

fn poor_power_factor(r: &RuleInput) -> bool {
    r.power_factor() < 0.9
}

fn overvoltage(r: &RuleInput) -> bool {
    r.voltage() > 230.0 && r.predicted_energy > 40.0
}

fn heavy_load(r: &RuleInput) -> bool {
    r.predicted_energy > 50.0
}

// Evaluated top to bottom; the first predicate that holds decides.
const LADDER: [(Recommendation, Rule); 5] = [
    (Recommendation::ReduceHvacAndLighting, unoccupied),
    (Recommendation::LowerThermostat, overheated),
    (Recommendation::ImprovePowerFactor, poor_power_factor),
    (Recommendation::CheckVoltageRegulation, overvoltage),
    (Recommendation::OptimizeScheduling, heavy_load),
];

pub fn recommend(input: &RuleInput) -> Recommendation {
    LADDER
        .iter()
        .find(|(_, rule)| rule(input))
        .map(|(rec, _)| *rec)
        .unwrap_or(Recommendation::MaintainCurrentSettings)
}
