//! Wire schema of the probabilistic forecast service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError};

use super::reading::{LooseValue, DYNAMIC_FEATURES};
use crate::error::PipelineError;

/// One entity's history submitted for forecasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_request_shape"))]
pub struct ForecastRequest {
    /// ISO-8601 timestamp of the first historical point.
    pub start: String,
    #[validate(length(min = 1))]
    pub target: Vec<f64>,
    #[validate(length(equal = 8))]
    pub feat_dynamic_real: Vec<Vec<f64>>,
    #[validate(length(equal = 1))]
    pub feat_static_cat: Vec<usize>,
    #[validate(length(equal = 1))]
    pub feat_static_real: Vec<f64>,
}

fn shape_error(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Owned(message));
    err
}

fn validate_request_shape(req: &ForecastRequest) -> Result<(), ValidationError> {
    let width = req.target.len();
    if let Some((i, series)) = req
        .feat_dynamic_real
        .iter()
        .enumerate()
        .find(|(_, s)| s.len() != width)
    {
        let name = DYNAMIC_FEATURES.get(i).copied().unwrap_or("unknown");
        return Err(shape_error(
            "ragged_series",
            format!("{name} has {} points, target has {width}", series.len()),
        ));
    }

    let all_finite = req
        .target
        .iter()
        .chain(req.feat_dynamic_real.iter().flatten())
        .chain(req.feat_static_real.iter())
        .all(|v| v.is_finite());
    if !all_finite {
        return Err(shape_error(
            "non_finite",
            "request contains NaN or infinite values".to_string(),
        ));
    }

    if DateTime::parse_from_rfc3339(&req.start).is_err() {
        return Err(shape_error(
            "invalid_start",
            format!("start {:?} is not an ISO-8601 timestamp", req.start),
        ));
    }
    Ok(())
}

/// The request body: `{"data": [...]}`.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastBatch<'a> {
    pub data: &'a [ForecastRequest],
}

/// Forecast start as emitted by the service: a plain string, or a period
/// object wrapping the timestamp in `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForecastStart {
    Text(String),
    Period { value: LooseValue },
}

impl ForecastStart {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Text(s) => super::reading::parse_timestamp(s),
            Self::Period { value } => value.as_timestamp(),
        }
    }
}

/// One entity's forecast. Fields are optional on the wire so that contract
/// violations surface as mapping errors rather than decode errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub start: Option<ForecastStart>,
    #[serde(default)]
    pub mean: Vec<f64>,
    #[serde(default)]
    pub feat_static_cat: Option<Vec<i64>>,
}

/// Deployments answer either with a bare list or with `{"predictions": [...]}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastEnvelope {
    Bare(Vec<ForecastResponse>),
    Wrapped { predictions: Vec<ForecastResponse> },
}

impl ForecastEnvelope {
    pub fn from_value(value: serde_json::Value) -> Result<Vec<ForecastResponse>, PipelineError> {
        Self::decode(value).map(Self::into_responses)
    }

    /// Dispatches on the outer shape first so item errors keep their path.
    pub fn decode(value: serde_json::Value) -> Result<Self, PipelineError> {
        match value {
            serde_json::Value::Array(items) => decode_items("", items).map(Self::Bare),
            serde_json::Value::Object(mut fields) => match fields.remove("predictions") {
                Some(serde_json::Value::Array(items)) => {
                    decode_items("predictions", items).map(|predictions| Self::Wrapped { predictions })
                }
                Some(other) => Err(PipelineError::Mapping(format!(
                    "predictions must be a list, got {}",
                    json_kind(&other)
                ))),
                None => Err(PipelineError::Mapping(format!(
                    "response object has no predictions list (keys: {})",
                    fields.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
                ))),
            },
            other => Err(PipelineError::Mapping(format!(
                "response is neither a forecast list nor a predictions object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn into_responses(self) -> Vec<ForecastResponse> {
        match self {
            Self::Bare(list) => list,
            Self::Wrapped { predictions } => predictions,
        }
    }
}

fn decode_items(
    prefix: &str,
    items: Vec<serde_json::Value>,
) -> Result<Vec<ForecastResponse>, PipelineError> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| decode_item(&format!("{prefix}[{i}]"), item))
        .collect()
}

/// Decodes one forecast field by field, so a bad value is reported by path.
fn decode_item(path: &str, item: serde_json::Value) -> Result<ForecastResponse, PipelineError> {
    let serde_json::Value::Object(mut fields) = item else {
        return Err(PipelineError::Mapping(format!(
            "{path}: expected an object, got {}",
            json_kind(&item)
        )));
    };

    fn field<T: serde::de::DeserializeOwned>(
        path: &str,
        fields: &mut serde_json::Map<String, serde_json::Value>,
        name: &str,
    ) -> Result<Option<T>, PipelineError> {
        match fields.remove(name) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| PipelineError::Mapping(format!("{path}.{name}: {e}"))),
        }
    }

    Ok(ForecastResponse {
        start: field(path, &mut fields, "start")?,
        mean: field(path, &mut fields, "mean")?.unwrap_or_default(),
        feat_static_cat: field(path, &mut fields, "feat_static_cat")?,
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(width: usize) -> ForecastRequest {
        ForecastRequest {
            start: "2025-06-15T00:00:00Z".into(),
            target: vec![50.5; width],
            feat_dynamic_real: vec![vec![1.0; width]; 8],
            feat_static_cat: vec![0],
            feat_static_real: vec![1000.0],
        }
    }

    #[test]
    fn test_well_formed_request_validates() {
        assert!(request(24).validate().is_ok());
    }

    #[test]
    fn test_ragged_request_is_rejected() {
        let mut req = request(24);
        req.feat_dynamic_real[3].pop();
        let err = req.validate().unwrap_err().to_string();
        assert!(err.contains("current has 23 points"), "{err}");
    }

    #[test]
    fn test_wrong_feature_count_is_rejected() {
        let mut req = request(4);
        req.feat_dynamic_real.pop();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_non_finite_and_bad_start_are_rejected() {
        let mut req = request(4);
        req.target[1] = f64::NAN;
        assert!(req.validate().is_err());

        let mut req = request(4);
        req.start = "yesterday".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_request_serializes_with_model_field_names() {
        let body = serde_json::to_value(ForecastBatch { data: &[request(2)] }).unwrap();
        assert_eq!(body["data"][0]["feat_static_cat"], json!([0]));
        assert_eq!(body["data"][0]["feat_dynamic_real"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn test_envelope_accepts_both_shapes() {
        let item = json!({"start": "2025-06-15T00:00:00Z", "mean": [1.0], "feat_static_cat": [0]});

        let bare = ForecastEnvelope::from_value(json!([item.clone()])).unwrap();
        let wrapped = ForecastEnvelope::from_value(json!({ "predictions": [item] })).unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare[0].mean, vec![1.0]);
    }

    #[test]
    fn test_envelope_rejects_other_shapes() {
        let err = ForecastEnvelope::from_value(json!({"result": []})).unwrap_err();
        assert!(matches!(err, PipelineError::Mapping(_)));
    }

    #[test]
    fn test_bad_item_field_is_named() {
        let err = ForecastEnvelope::from_value(json!({
            "predictions": [
                {"start": "2025-06-15T00:00:00Z", "mean": [1.0], "feat_static_cat": [0]},
                {"start": "2025-06-15T00:00:00Z", "mean": [null], "feat_static_cat": [1]}
            ]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("predictions[1].mean"), "{err}");

        let err = ForecastEnvelope::from_value(json!([
            {"start": "2025-06-15T00:00:00Z", "mean": [1.0], "feat_static_cat": [0.5]}
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("[0].feat_static_cat"), "{err}");
    }

    #[test]
    fn test_period_start_is_unwrapped() {
        let resp: ForecastResponse = serde_json::from_value(json!({
            "start": {"value": "2025-06-15 00:00:00", "freq": "H"},
            "mean": [3.0],
            "feat_static_cat": [1]
        }))
        .unwrap();
        let start = resp.start.unwrap().to_utc().unwrap();
        assert_eq!(start.to_rfc3339(), "2025-06-15T00:00:00+00:00");
    }
}
