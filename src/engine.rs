//! Auto-schedule engine: turns template watermarks into persisted instances.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Days, NaiveDate};
use serde::{Serialize, Serializer};
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, StoreError};
use crate::locks::TemplateLocks;
use crate::models::{ClassTemplate, NewClassInstance, TemplateId};
use crate::occurrence::occurrences;
use crate::store::{InstanceStore, TemplateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Inactive,
    AutoScheduleDisabled,
}

fn error_message<S>(error: &SchedulerError, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(error)
}

/// Result of one template's catch-up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CatchUpOutcome {
    /// New instances were written and the watermark advanced.
    Scheduled { created: usize, watermark: NaiveDate },
    /// Nothing was missing inside the horizon.
    UpToDate,
    Skipped { reason: SkipReason },
    /// The watermark was left untouched; rerunning is safe.
    Failed {
        #[serde(serialize_with = "error_message")]
        error: SchedulerError,
    },
    /// The batch deadline passed before this template was processed.
    NotReached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateOutcome {
    pub template_id: TemplateId,
    #[serde(flatten)]
    pub outcome: CatchUpOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatchUpSummary {
    pub scheduled: usize,
    pub instances_created: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_reached: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatchUpReport {
    pub outcomes: Vec<TemplateOutcome>,
}

impl CatchUpReport {
    pub fn summary(&self) -> CatchUpSummary {
        let mut summary = CatchUpSummary::default();
        for item in &self.outcomes {
            match &item.outcome {
                CatchUpOutcome::Scheduled { created, .. } => {
                    summary.scheduled += 1;
                    summary.instances_created += created;
                }
                CatchUpOutcome::UpToDate => summary.up_to_date += 1,
                CatchUpOutcome::Skipped { .. } => summary.skipped += 1,
                CatchUpOutcome::Failed { .. } => summary.failed += 1,
                CatchUpOutcome::NotReached => summary.not_reached += 1,
            }
        }
        summary
    }

    pub fn outcome_for(&self, template_id: TemplateId) -> Option<&CatchUpOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.template_id == template_id)
            .map(|o| &o.outcome)
    }
}

/// Template state after an auto-schedule toggle, with the catch-up it triggered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoScheduleChange {
    pub template: ClassTemplate,
    pub catch_up: Option<CatchUpOutcome>,
}

pub struct AutoScheduler {
    templates: Arc<dyn TemplateStore>,
    instances: Arc<dyn InstanceStore>,
    locks: Arc<TemplateLocks>,
}

impl AutoScheduler {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        instances: Arc<dyn InstanceStore>,
        locks: Arc<TemplateLocks>,
    ) -> Self {
        Self {
            templates,
            instances,
            locks,
        }
    }

    /// Materializes every missing occurrence of one template between its
    /// watermark (or `now`) and `now + horizon_weeks`.
    ///
    /// Store failures are reported as [`CatchUpOutcome::Failed`] instead of
    /// being raised. Instances written before a failure stay in place, the
    /// watermark does not move, and a rerun fills in the rest.
    pub fn run_catch_up_for_template(
        &self,
        template_id: TemplateId,
        now: NaiveDate,
        horizon_weeks: u32,
    ) -> CatchUpOutcome {
        let result = self
            .locks
            .with_lock(template_id, || self.catch_up(template_id, now, horizon_weeks));

        match result {
            Ok(outcome) => {
                match &outcome {
                    CatchUpOutcome::Scheduled { created, watermark } => info!(
                        template_id,
                        created,
                        watermark = %watermark,
                        "scheduled class instances"
                    ),
                    other => debug!(template_id, outcome = ?other, "nothing to schedule"),
                }
                outcome
            }
            Err(error) => {
                warn!(template_id, error = %error, "catch-up failed");
                CatchUpOutcome::Failed { error }
            }
        }
    }

    fn catch_up(
        &self,
        template_id: TemplateId,
        now: NaiveDate,
        horizon_weeks: u32,
    ) -> Result<CatchUpOutcome, SchedulerError> {
        let template = self
            .templates
            .get(template_id)
            .map_err(SchedulerError::StoreReadFailed)?
            .ok_or(SchedulerError::TemplateNotFound(template_id))?;

        if !template.is_active {
            return Ok(CatchUpOutcome::Skipped {
                reason: SkipReason::Inactive,
            });
        }
        if !template.auto_schedule {
            return Ok(CatchUpOutcome::Skipped {
                reason: SkipReason::AutoScheduleDisabled,
            });
        }
        template.validate()?;

        let horizon_end = now
            .checked_add_days(Days::new(7 * u64::from(horizon_weeks)))
            .unwrap_or(NaiveDate::MAX);
        let window_start = template
            .last_scheduled_date
            .map_or(now, |watermark| watermark.max(now));
        let candidates = occurrences(&template, window_start, horizon_end);
        let Some(&last) = candidates.last() else {
            return Ok(CatchUpOutcome::UpToDate);
        };

        let mut created = 0;
        for date in candidates {
            if self
                .instances
                .exists(template_id, date)
                .map_err(SchedulerError::StoreReadFailed)?
            {
                continue;
            }
            match self
                .instances
                .create(NewClassInstance::from_template(&template, date))
            {
                Ok(_) => created += 1,
                // Someone outside this process got there first.
                Err(StoreError::Conflict { .. }) => {
                    debug!(template_id, date = %date, "instance already present")
                }
                Err(err) => return Err(SchedulerError::StoreWriteFailed(err)),
            }
        }

        let behind = template.last_scheduled_date.is_none_or(|mark| mark < last);
        if created == 0 && !behind {
            return Ok(CatchUpOutcome::UpToDate);
        }

        // Every candidate up to `last` is present now, including the case
        // where an earlier run wrote them all but failed to save the watermark.
        let mut template = template;
        template.last_scheduled_date = Some(last);
        self.templates
            .update(&template)
            .map_err(SchedulerError::StoreWriteFailed)?;

        if created == 0 {
            debug!(template_id, watermark = %last, "watermark caught up with existing instances");
            return Ok(CatchUpOutcome::UpToDate);
        }
        Ok(CatchUpOutcome::Scheduled {
            created,
            watermark: last,
        })
    }

    /// Runs catch-up for every active, auto-scheduled template. One template
    /// failing does not stop the others. Only a failure to list templates is
    /// returned as an error.
    pub fn run_catch_up_for_all_active_templates(
        &self,
        now: NaiveDate,
        horizon_weeks: u32,
    ) -> Result<CatchUpReport, SchedulerError> {
        self.run_batch(now, horizon_weeks, None)
    }

    /// Like [`Self::run_catch_up_for_all_active_templates`], but templates not
    /// started before `deadline` are reported as [`CatchUpOutcome::NotReached`].
    pub fn run_catch_up_until(
        &self,
        now: NaiveDate,
        horizon_weeks: u32,
        deadline: Instant,
    ) -> Result<CatchUpReport, SchedulerError> {
        self.run_batch(now, horizon_weeks, Some(deadline))
    }

    fn run_batch(
        &self,
        now: NaiveDate,
        horizon_weeks: u32,
        deadline: Option<Instant>,
    ) -> Result<CatchUpReport, SchedulerError> {
        let templates = self.templates.list_active().map_err(|err| {
            error!(error = %err, "failed to list active templates");
            SchedulerError::StoreReadFailed(err)
        })?;

        let outcomes = templates
            .iter()
            .filter(|t| t.schedules_automatically())
            .map(|template| {
                let outcome = match deadline {
                    Some(deadline) if Instant::now() >= deadline => CatchUpOutcome::NotReached,
                    _ => self.run_catch_up_for_template(template.id, now, horizon_weeks),
                };
                TemplateOutcome {
                    template_id: template.id,
                    outcome,
                }
            })
            .collect();

        let report = CatchUpReport { outcomes };
        let summary = report.summary();
        info!(
            scheduled = summary.scheduled,
            created = summary.instances_created,
            up_to_date = summary.up_to_date,
            failed = summary.failed,
            not_reached = summary.not_reached,
            "catch-up finished"
        );
        Ok(report)
    }

    /// Persists the auto-schedule flag. Turning it on runs catch-up right away;
    /// turning it off leaves already generated instances alone.
    pub fn set_auto_schedule(
        &self,
        template_id: TemplateId,
        enabled: bool,
        now: NaiveDate,
        horizon_weeks: u32,
    ) -> Result<AutoScheduleChange, SchedulerError> {
        let (template, switched_on) = self.locks.with_lock(template_id, || {
            let mut template = self
                .templates
                .get(template_id)
                .map_err(SchedulerError::StoreReadFailed)?
                .ok_or(SchedulerError::TemplateNotFound(template_id))?;
            let was_enabled = template.auto_schedule;
            if was_enabled != enabled {
                template.auto_schedule = enabled;
                self.templates
                    .update(&template)
                    .map_err(SchedulerError::StoreWriteFailed)?;
                info!(template_id, enabled, "auto-schedule toggled");
            }
            Ok::<_, SchedulerError>((template, !was_enabled && enabled))
        })?;

        if !switched_on {
            return Ok(AutoScheduleChange {
                template,
                catch_up: None,
            });
        }

        let outcome = self.run_catch_up_for_template(template_id, now, horizon_weeks);
        let template = self
            .templates
            .get(template_id)
            .map_err(SchedulerError::StoreReadFailed)?
            .unwrap_or(template);
        Ok(AutoScheduleChange {
            template,
            catch_up: Some(outcome),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::models::ClassInstance;
    use crate::store::{InMemoryInstanceStore, InMemoryTemplateStore};

    /// Template store whose reads, listings and updates can be switched to
    /// fail independently.
    #[derive(Default)]
    pub struct FailingTemplateStore {
        pub inner: InMemoryTemplateStore,
        pub fail_get: AtomicBool,
        pub fail_list: AtomicBool,
        pub fail_update: AtomicBool,
    }

    impl FailingTemplateStore {
        fn check(flag: &AtomicBool) -> Result<(), StoreError> {
            if flag.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("template table locked".into()));
            }
            Ok(())
        }
    }

    impl TemplateStore for FailingTemplateStore {
        fn get(&self, id: TemplateId) -> Result<Option<ClassTemplate>, StoreError> {
            Self::check(&self.fail_get)?;
            self.inner.get(id)
        }

        fn list(&self) -> Result<Vec<ClassTemplate>, StoreError> {
            Self::check(&self.fail_list)?;
            self.inner.list()
        }

        fn list_active(&self) -> Result<Vec<ClassTemplate>, StoreError> {
            Self::check(&self.fail_list)?;
            self.inner.list_active()
        }

        fn create(&self, template: ClassTemplate) -> Result<ClassTemplate, StoreError> {
            self.inner.create(template)
        }

        fn update(&self, template: &ClassTemplate) -> Result<(), StoreError> {
            Self::check(&self.fail_update)?;
            self.inner.update(template)
        }
    }

    /// Instance store that fails writes for one template after a number of
    /// successful ones, until [`FlakyInstanceStore::recover`] is called.
    pub struct FlakyInstanceStore {
        pub inner: InMemoryInstanceStore,
        failing_template: TemplateId,
        writes_before_failure: usize,
        writes: AtomicUsize,
        recovered: AtomicBool,
    }

    impl FlakyInstanceStore {
        pub fn new(failing_template: TemplateId, writes_before_failure: usize) -> Self {
            Self {
                inner: InMemoryInstanceStore::new(),
                failing_template,
                writes_before_failure,
                writes: AtomicUsize::new(0),
                recovered: AtomicBool::new(false),
            }
        }

        pub fn recover(&self) {
            self.recovered.store(true, Ordering::SeqCst);
        }
    }

    impl InstanceStore for FlakyInstanceStore {
        fn exists(&self, template_id: TemplateId, date: NaiveDate) -> Result<bool, StoreError> {
            self.inner.exists(template_id, date)
        }

        fn create(&self, instance: NewClassInstance) -> Result<ClassInstance, StoreError> {
            if instance.source_template_id == Some(self.failing_template)
                && !self.recovered.load(Ordering::SeqCst)
            {
                let seen = self.writes.fetch_add(1, Ordering::SeqCst);
                if seen >= self.writes_before_failure {
                    return Err(StoreError::Unavailable("connection reset".into()));
                }
            }
            self.inner.create(instance)
        }

        fn list_between(
            &self,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<ClassInstance>, StoreError> {
            self.inner.list_between(from, to)
        }

        fn list_for_template(
            &self,
            template_id: TemplateId,
        ) -> Result<Vec<ClassInstance>, StoreError> {
            self.inner.list_for_template(template_id)
        }
    }
}
