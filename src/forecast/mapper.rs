use chrono::TimeDelta;
use tracing::debug;

use crate::domain::{ForecastResponse, PredictionRecord};
use crate::error::PipelineError;

/// Expands every forecast into hourly prediction rows, `mean[k]` landing at
/// `start + k hours`.
pub fn map_responses(
    responses: &[ForecastResponse],
    index_to_building: &[String],
) -> Result<Vec<PredictionRecord>, PipelineError> {
    let mut records = Vec::with_capacity(responses.iter().map(|r| r.mean.len()).sum());

    for (position, resp) in responses.iter().enumerate() {
        let index = resp
            .feat_static_cat
            .as_ref()
            .and_then(|cats| cats.first().copied())
            .ok_or_else(|| {
                PipelineError::Mapping(format!("response {position}: feat_static_cat is missing"))
            })?;
        let building_id = usize::try_from(index)
            .ok()
            .and_then(|i| index_to_building.get(i))
            .ok_or_else(|| {
                PipelineError::Mapping(format!(
                    "response {position}: feat_static_cat {index} does not match any of {} buildings",
                    index_to_building.len()
                ))
            })?;

        if resp.mean.is_empty() {
            return Err(PipelineError::Mapping(format!(
                "response {position} (building {building_id}): mean is empty"
            )));
        }
        let start = resp
            .start
            .as_ref()
            .ok_or_else(|| {
                PipelineError::Mapping(format!(
                    "response {position} (building {building_id}): start is missing"
                ))
            })?
            .to_utc()
            .ok_or_else(|| {
                PipelineError::Mapping(format!(
                    "response {position} (building {building_id}): start is not a timestamp"
                ))
            })?;

        debug!(building_id = %building_id, horizon = resp.mean.len(), %start, "mapped forecast");
        for (k, value) in resp.mean.iter().enumerate() {
            let timestamp = i64::try_from(k)
                .ok()
                .and_then(TimeDelta::try_hours)
                .and_then(|offset| start.checked_add_signed(offset))
                .ok_or_else(|| {
                    PipelineError::Mapping(format!(
                        "response {position} (building {building_id}): hour {k} after {start} is out of range"
                    ))
                })?;
            records.push(PredictionRecord {
                timestamp,
                building_id: building_id.clone(),
                predicted_energy: *value,
            });
        }
    }

    Ok(records)
}
