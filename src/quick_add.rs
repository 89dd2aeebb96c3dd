use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::info;

use crate::error::{SchedulerError, StoreError};
use crate::locks::TemplateLocks;
use crate::models::{
    ClassInstance, ClassTemplate, CreationSource, InstanceStatus, NewClassInstance, end_time_for,
};
use crate::store::InstanceStore;

/// Creates one-off instances of a template on an arbitrary date.
pub struct QuickAddResolver {
    instances: Arc<dyn InstanceStore>,
    locks: Arc<TemplateLocks>,
}

impl QuickAddResolver {
    pub fn new(instances: Arc<dyn InstanceStore>, locks: Arc<TemplateLocks>) -> Self {
        Self { instances, locks }
    }

    /// Writes a `ManualOverride` instance of `template` on `date`. The date does
    /// not have to fall on the template's weekday, and the template itself
    /// (watermark included) is never modified.
    pub fn resolve(
        &self,
        template: &ClassTemplate,
        date: NaiveDate,
        start_time_override: Option<NaiveTime>,
        duration_override: Option<f64>,
    ) -> Result<ClassInstance, SchedulerError> {
        template.validate()?;

        let start_time = start_time_override.unwrap_or(template.start_time);
        let duration_hours = duration_override.unwrap_or(template.duration_hours);
        let end_time = end_time_for(start_time, duration_hours).ok_or_else(|| {
            SchedulerError::InvalidOverride(format!(
                "a {duration_hours}h class starting at {start_time} must end later the same day"
            ))
        })?;

        let instance = NewClassInstance {
            studio_id: template.studio_id.clone(),
            title: template.title.clone(),
            date,
            start_time,
            end_time,
            duration_hours,
            status: InstanceStatus::Scheduled,
            creation_source: CreationSource::ManualOverride,
            source_template_id: Some(template.id),
        };

        let created = self.locks.with_lock(template.id, || {
            let taken = self
                .instances
                .exists(template.id, date)
                .map_err(SchedulerError::StoreReadFailed)?;
            if taken {
                return Err(SchedulerError::DuplicateOccurrence {
                    template_id: template.id,
                    date,
                });
            }
            self.instances.create(instance).map_err(|err| match err {
                StoreError::Conflict { template_id, date } => {
                    SchedulerError::DuplicateOccurrence { template_id, date }
                }
                other => SchedulerError::StoreWriteFailed(other),
            })
        })?;

        info!(
            template_id = template.id,
            date = %date,
            start = %created.start_time,
            "quick-added class instance"
        );
        Ok(created)
    }
}
