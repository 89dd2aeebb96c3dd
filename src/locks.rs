use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::TemplateId;

/// Per-template mutual exclusion shared by everything that checks-then-writes
/// instances of a template.
#[derive(Default)]
pub struct TemplateLocks {
    locks: Mutex<HashMap<TemplateId, Arc<Mutex<()>>>>,
}

impl TemplateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `template_id`. Not reentrant.
    pub fn with_lock<R>(&self, template_id: TemplateId, f: impl FnOnce() -> R) -> R {
        let lock = self.locks.lock().entry(template_id).or_default().clone();
        let _guard = lock.lock();
        f()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn test_same_template_is_serialized() {
        let locks = TemplateLocks::new();
        let inside = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    locks.with_lock(1, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                });
            }
        });

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_templates_do_not_block() {
        let locks = TemplateLocks::new();
        let value = locks.with_lock(1, || locks.with_lock(2, || 42));
        assert_eq!(value, 42);
    }
}
