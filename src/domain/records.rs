use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One forecast step for one building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub timestamp: DateTime<Utc>,
    pub building_id: String,
    pub predicted_energy: f64,
}

/// A prediction paired with the advice derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub timestamp: DateTime<Utc>,
    pub building_id: String,
    pub predicted_energy: f64,
    pub recommendation: String,
}
