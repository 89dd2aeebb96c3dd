//! Data-access ports for templates and instances, plus in-memory backends.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::models::{ClassInstance, ClassTemplate, InstanceId, NewClassInstance, TemplateId};

pub trait TemplateStore: Send + Sync {
    fn get(&self, id: TemplateId) -> Result<Option<ClassTemplate>, StoreError>;

    fn list(&self) -> Result<Vec<ClassTemplate>, StoreError>;

    /// Templates with `is_active` set, ordered by id.
    fn list_active(&self) -> Result<Vec<ClassTemplate>, StoreError>;

    /// Persists a new template under a freshly assigned id; `template.id` is ignored.
    fn create(&self, template: ClassTemplate) -> Result<ClassTemplate, StoreError>;

    fn update(&self, template: &ClassTemplate) -> Result<(), StoreError>;
}

pub trait InstanceStore: Send + Sync {
    /// Whether a template-derived instance exists for `(template_id, date)`.
    fn exists(&self, template_id: TemplateId, date: NaiveDate) -> Result<bool, StoreError>;

    /// Persists `instance`, failing with [`StoreError::Conflict`] when it would
    /// duplicate a template-derived instance for the same date.
    fn create(&self, instance: NewClassInstance) -> Result<ClassInstance, StoreError>;

    /// Instances dated within `[from, to]`, ordered by date then start time.
    fn list_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ClassInstance>, StoreError>;

    fn list_for_template(
        &self,
        template_id: TemplateId,
    ) -> Result<Vec<ClassInstance>, StoreError>;
}

#[derive(Default)]
struct TemplateTable {
    last_id: TemplateId,
    rows: BTreeMap<TemplateId, ClassTemplate>,
}

#[derive(Default)]
pub struct InMemoryTemplateStore {
    inner: RwLock<TemplateTable>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn get(&self, id: TemplateId) -> Result<Option<ClassTemplate>, StoreError> {
        Ok(self.inner.read().rows.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<ClassTemplate>, StoreError> {
        Ok(self.inner.read().rows.values().cloned().collect())
    }

    fn list_active(&self) -> Result<Vec<ClassTemplate>, StoreError> {
        Ok(self
            .inner
            .read()
            .rows
            .values()
            .filter(|t| t.is_active)
            .cloned()
            .collect())
    }

    fn create(&self, mut template: ClassTemplate) -> Result<ClassTemplate, StoreError> {
        let mut table = self.inner.write();
        table.last_id += 1;
        template.id = table.last_id;
        table.rows.insert(template.id, template.clone());
        Ok(template)
    }

    fn update(&self, template: &ClassTemplate) -> Result<(), StoreError> {
        let mut table = self.inner.write();
        let row = table
            .rows
            .get_mut(&template.id)
            .ok_or(StoreError::NotFound(template.id))?;
        *row = template.clone();
        Ok(())
    }
}

#[derive(Default)]
struct InstanceTable {
    last_id: InstanceId,
    rows: BTreeMap<InstanceId, ClassInstance>,
    occurrences: HashSet<(TemplateId, NaiveDate)>,
}

/// Instance store with a uniqueness constraint on `(source_template_id, date)`
/// for template-derived rows.
#[derive(Default)]
pub struct InMemoryInstanceStore {
    inner: RwLock<InstanceTable>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sorted(mut instances: Vec<ClassInstance>) -> Vec<ClassInstance> {
    instances.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then(a.start_time.cmp(&b.start_time))
            .then(a.id.cmp(&b.id))
    });
    instances
}

impl InstanceStore for InMemoryInstanceStore {
    fn exists(&self, template_id: TemplateId, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self.inner.read().occurrences.contains(&(template_id, date)))
    }

    fn create(&self, instance: NewClassInstance) -> Result<ClassInstance, StoreError> {
        let mut table = self.inner.write();
        if let Some(key) = instance.occurrence_key()
            && !table.occurrences.insert(key)
        {
            return Err(StoreError::Conflict {
                template_id: key.0,
                date: key.1,
            });
        }
        table.last_id += 1;
        let created = instance.with_id(table.last_id);
        table.rows.insert(created.id, created.clone());
        Ok(created)
    }

    fn list_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ClassInstance>, StoreError> {
        let table = self.inner.read();
        Ok(sorted(
            table
                .rows
                .values()
                .filter(|i| i.date >= from && i.date <= to)
                .cloned()
                .collect(),
        ))
    }

    fn list_for_template(
        &self,
        template_id: TemplateId,
    ) -> Result<Vec<ClassInstance>, StoreError> {
        let table = self.inner.read();
        Ok(sorted(
            table
                .rows
                .values()
                .filter(|i| i.source_template_id == Some(template_id))
                .cloned()
                .collect(),
        ))
    }
}
