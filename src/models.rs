use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::SchedulerError;

pub type TemplateId = u64;
pub type InstanceId = u64;

/// Allowed drift between `duration_hours` and `end_time - start_time` (one second).
const DURATION_TOLERANCE_HOURS: f64 = 1.0 / 3600.0;

/// Length of the interval between two times of day, in hours.
pub fn hours_between(start: NaiveTime, end: NaiveTime) -> f64 {
    end.signed_duration_since(start).num_seconds() as f64 / 3600.0
}

/// End of a class starting at `start` and lasting `duration_hours`.
///
/// Returns `None` for non-positive durations and for classes that would run
/// past midnight.
pub fn end_time_for(start: NaiveTime, duration_hours: f64) -> Option<NaiveTime> {
    if !duration_hours.is_finite() {
        return None;
    }
    let seconds = (duration_hours * 3600.0).round() as i64;
    if seconds <= 0 {
        return None;
    }
    let (end, wrapped) = start.overflowing_add_signed(TimeDelta::try_seconds(seconds)?);
    if wrapped != 0 { None } else { Some(end) }
}

/// A weekly recurring class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ClassTemplate {
    pub id: TemplateId,
    pub studio_id: String,
    #[schema(example = "Vinyasa Flow")]
    pub title: String,
    pub class_name: String,
    #[schema(value_type = String, example = "Mon")]
    pub weekday: Weekday,
    #[schema(value_type = String, format = "time", example = "18:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, format = "time", example = "19:15:00")]
    pub end_time: NaiveTime,
    #[schema(example = 1.25)]
    pub duration_hours: f64,
    pub is_active: bool,
    pub auto_schedule: bool,
    /// Latest date the engine has generated an instance for.
    pub last_scheduled_date: Option<NaiveDate>,
}

impl ClassTemplate {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        validate_shape(
            &self.title,
            self.start_time,
            self.end_time,
            self.duration_hours,
        )?;
        if let Some(watermark) = self.last_scheduled_date
            && watermark.weekday() != self.weekday
        {
            return Err(SchedulerError::InvalidTemplate(format!(
                "last scheduled date {watermark} is not a {:?}",
                self.weekday
            )));
        }
        Ok(())
    }

    pub fn schedules_automatically(&self) -> bool {
        self.is_active && self.auto_schedule
    }
}

fn validate_shape(
    title: &str,
    start_time: NaiveTime,
    end_time: NaiveTime,
    duration_hours: f64,
) -> Result<(), SchedulerError> {
    if title.trim().is_empty() {
        return Err(SchedulerError::InvalidTemplate("title must not be empty".into()));
    }
    if end_time <= start_time {
        return Err(SchedulerError::InvalidTemplate(format!(
            "end time {end_time} must be after start time {start_time}"
        )));
    }
    let expected = hours_between(start_time, end_time);
    if !duration_hours.is_finite() || (duration_hours - expected).abs() > DURATION_TOLERANCE_HOURS
    {
        return Err(SchedulerError::InvalidTemplate(format!(
            "duration of {duration_hours}h does not match {start_time}-{end_time}"
        )));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

/// Input for creating a template; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TemplateDraft {
    pub studio_id: String,
    pub title: String,
    pub class_name: String,
    #[schema(value_type = String, example = "Mon")]
    pub weekday: Weekday,
    #[schema(value_type = String, format = "time", example = "18:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, format = "time", example = "19:15:00")]
    pub end_time: NaiveTime,
    /// Derived from the time window when omitted.
    #[serde(default)]
    pub duration_hours: Option<f64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub auto_schedule: bool,
}

impl TemplateDraft {
    pub fn into_template(self, id: TemplateId) -> Result<ClassTemplate, SchedulerError> {
        let duration_hours = self
            .duration_hours
            .unwrap_or_else(|| hours_between(self.start_time, self.end_time));
        let template = ClassTemplate {
            id,
            studio_id: self.studio_id,
            title: self.title,
            class_name: self.class_name,
            weekday: self.weekday,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_hours,
            is_active: self.is_active,
            auto_schedule: self.auto_schedule,
            last_scheduled_date: None,
        };
        template.validate()?;
        Ok(template)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Scheduled,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CreationSource {
    /// Generated by the auto-schedule engine.
    FromTemplate,
    /// One-off copy of a template, possibly with a different time or length.
    ManualOverride,
    /// Created by hand outside the scheduler.
    Manual,
}

impl CreationSource {
    /// Whether instances with this source count towards the one-per-date rule.
    pub fn is_template_derived(self) -> bool {
        matches!(self, CreationSource::FromTemplate | CreationSource::ManualOverride)
    }
}

/// A concrete, dated class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ClassInstance {
    pub id: InstanceId,
    pub studio_id: String,
    pub title: String,
    #[schema(value_type = String, format = "date", example = "2024-01-29")]
    pub date: NaiveDate,
    #[schema(value_type = String, format = "time", example = "18:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, format = "time", example = "19:15:00")]
    pub end_time: NaiveTime,
    pub duration_hours: f64,
    pub status: InstanceStatus,
    pub creation_source: CreationSource,
    pub source_template_id: Option<TemplateId>,
}

impl ClassInstance {
    pub fn occurrence_key(&self) -> Option<(TemplateId, NaiveDate)> {
        occurrence_key(self.creation_source, self.source_template_id, self.date)
    }
}

fn occurrence_key(
    source: CreationSource,
    template_id: Option<TemplateId>,
    date: NaiveDate,
) -> Option<(TemplateId, NaiveDate)> {
    match template_id {
        Some(id) if source.is_template_derived() => Some((id, date)),
        _ => None,
    }
}

/// An instance that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewClassInstance {
    pub studio_id: String,
    pub title: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_hours: f64,
    pub status: InstanceStatus,
    pub creation_source: CreationSource,
    pub source_template_id: Option<TemplateId>,
}

impl NewClassInstance {
    pub fn from_template(template: &ClassTemplate, date: NaiveDate) -> Self {
        Self {
            studio_id: template.studio_id.clone(),
            title: template.title.clone(),
            date,
            start_time: template.start_time,
            end_time: template.end_time,
            duration_hours: template.duration_hours,
            status: InstanceStatus::Scheduled,
            creation_source: CreationSource::FromTemplate,
            source_template_id: Some(template.id),
        }
    }

    pub fn occurrence_key(&self) -> Option<(TemplateId, NaiveDate)> {
        occurrence_key(self.creation_source, self.source_template_id, self.date)
    }

    pub fn with_id(self, id: InstanceId) -> ClassInstance {
        ClassInstance {
            id,
            studio_id: self.studio_id,
            title: self.title,
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_hours: self.duration_hours,
            status: self.status,
            creation_source: self.creation_source,
            source_template_id: self.source_template_id,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// "Vinyasa Flow", Mondays 18:00-19:15, auto-scheduled.
    pub fn vinyasa(id: TemplateId) -> ClassTemplate {
        ClassTemplate {
            id,
            studio_id: "studio-1".into(),
            title: "Vinyasa Flow".into(),
            class_name: "Yoga".into(),
            weekday: Weekday::Mon,
            start_time: time(18, 0),
            end_time: time(19, 15),
            duration_hours: 1.25,
            is_active: true,
            auto_schedule: true,
            last_scheduled_date: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_valid_template() {
        assert!(vinyasa(1).validate().is_ok());
    }

    #[test]
    fn test_end_before_start_rejected() {
        let mut template = vinyasa(1);
        template.end_time = time(17, 0);
        assert!(matches!(
            template.validate(),
            Err(SchedulerError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_inconsistent_duration_rejected() {
        let mut template = vinyasa(1);
        template.duration_hours = 1.0;
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_watermark_on_wrong_weekday_rejected() {
        let mut template = vinyasa(1);
        template.last_scheduled_date = Some(date(2024, 1, 30));
        assert!(template.validate().is_err());
        template.last_scheduled_date = Some(date(2024, 1, 29));
        assert!(template.validate().is_ok());
    }

    #[test]
    fn test_draft_derives_duration() {
        let draft = TemplateDraft {
            studio_id: "studio-1".into(),
            title: "Pilates".into(),
            class_name: "Pilates".into(),
            weekday: Weekday::Wed,
            start_time: time(9, 30),
            end_time: time(10, 15),
            duration_hours: None,
            is_active: true,
            auto_schedule: false,
        };
        let template = draft.into_template(7).unwrap();
        assert_eq!(template.id, 7);
        assert!((template.duration_hours - 0.75).abs() < f64::EPSILON);
        assert_eq!(template.last_scheduled_date, None);
    }

    #[test]
    fn test_end_time_for() {
        assert_eq!(end_time_for(time(20, 0), 1.0), Some(time(21, 0)));
        assert_eq!(end_time_for(time(18, 0), 1.25), Some(time(19, 15)));
        assert_eq!(end_time_for(time(23, 30), 1.0), None);
        assert_eq!(end_time_for(time(10, 0), 0.0), None);
        assert_eq!(end_time_for(time(10, 0), f64::NAN), None);
    }

    #[test]
    fn test_manual_instances_have_no_occurrence_key() {
        let mut instance = NewClassInstance::from_template(&vinyasa(4), date(2024, 1, 29));
        assert_eq!(instance.occurrence_key(), Some((4, date(2024, 1, 29))));
        instance.creation_source = CreationSource::Manual;
        assert_eq!(instance.occurrence_key(), None);
    }
}
