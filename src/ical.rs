use chrono::NaiveDateTime;
use icalendar::{Calendar, Component, Event, EventLike};

use crate::models::{ClassInstance, InstanceStatus};

#[derive(Clone)]
pub struct ICalExporter {
    calendar_name: String,
    location: Option<String>,
}

impl ICalExporter {
    pub fn new(calendar_name: impl Into<String>, location: Option<String>) -> Self {
        Self {
            calendar_name: calendar_name.into(),
            location,
        }
    }

    /// Renders scheduled and completed instances; cancelled ones are left out.
    pub fn generate(&self, instances: &[ClassInstance]) -> Vec<u8> {
        let visible: Vec<_> = instances
            .iter()
            .filter(|i| i.status != InstanceStatus::Cancelled)
            .collect();
        if visible.is_empty() {
            return Vec::new();
        }

        let mut calendar = Calendar::new();
        calendar.name(&self.calendar_name);

        for instance in visible {
            let mut event = Event::new();
            event.summary(&instance.title);
            event.starts(NaiveDateTime::new(instance.date, instance.start_time));
            event.ends(NaiveDateTime::new(instance.date, instance.end_time));
            if let Some(location) = &self.location {
                event.location(location);
            }
            event.description(&format!(
                "Studio: {}\nDuration: {}h",
                instance.studio_id, instance.duration_hours
            ));
            event.uid(&uid(instance));
            calendar.push(event);
        }

        calendar.to_string().into_bytes()
    }
}

/// Template-derived instances keep the same UID however often they are
/// exported, so calendar clients update rather than duplicate them.
fn uid(instance: &ClassInstance) -> String {
    match instance.occurrence_key() {
        Some((template_id, date)) => format!(
            "template-{template_id}-{}-class-autoscheduler",
            date.format("%Y%m%d")
        ),
        None => format!(
            "instance-{}-{}-class-autoscheduler",
            instance.id,
            instance.date.format("%Y%m%d")
        ),
    }
}
