use chrono::NaiveDate;

use crate::error::ApiError;

pub const MAX_HORIZON_WEEKS: u32 = 26;

/// Longest range the instance listing endpoints will return.
pub const MAX_RANGE_DAYS: i64 = 366;

pub fn validate_horizon_weeks(value: u32) -> Result<u32, ApiError> {
    if (1..=MAX_HORIZON_WEEKS).contains(&value) {
        Ok(value)
    } else {
        Err(ApiError::BadRequest(format!(
            "weeks must be between 1 and {MAX_HORIZON_WEEKS}"
        )))
    }
}

pub fn validate_date_range(from: NaiveDate, to: NaiveDate) -> Result<(), ApiError> {
    if from > to {
        return Err(ApiError::BadRequest("from must not be after to".into()));
    }
    if (to - from).num_days() > MAX_RANGE_DAYS {
        return Err(ApiError::BadRequest(format!(
            "range must not exceed {MAX_RANGE_DAYS} days"
        )));
    }
    Ok(())
}
