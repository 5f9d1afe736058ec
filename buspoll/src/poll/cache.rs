use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::model::{DeviceItem, PendingWrite};
use crate::types::Value;

/// Writes waiting for the flush deadline, at most one per item
#[derive(Debug, Default)]
pub(crate) struct WriteCache {
    entries: Vec<PendingWrite>,
    deadline: Option<Instant>,
    priority: bool,
}

impl WriteCache {
    /// Add or replace the pending value of an item and arm the flush deadline
    ///
    /// A routine write pushes the deadline back unless a priority write already armed it.
    /// A priority write can only bring it forward.
    pub(crate) fn queue(
        &mut self,
        item: Arc<DeviceItem>,
        value: Value,
        user_id: u32,
        debounce: Duration,
        priority: bool,
    ) {
        match self.entries.iter_mut().find(|e| e.item.id() == item.id()) {
            Some(entry) => {
                entry.value = value;
                entry.user_id = user_id;
            }
            None => self.entries.push(PendingWrite {
                item,
                value,
                user_id,
            }),
        }

        let deadline = Instant::now() + debounce;
        if priority {
            self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
            self.priority = true;
        } else if !self.priority || self.deadline.is_none() {
            self.deadline = Some(deadline);
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Stop the deadline but keep the entries
    pub(crate) fn disarm(&mut self) {
        self.deadline = None;
        self.priority = false;
    }

    /// Remove every entry, in the order the items were first written
    pub(crate) fn take(&mut self) -> Vec<PendingWrite> {
        self.disarm();
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, ItemConfig, ProjectConfig};
    use crate::model::{ItemId, Project};
    use crate::types::RegisterKind;

    const ROUTINE: Duration = Duration::from_millis(50);
    const PRIORITY: Duration = Duration::from_millis(5);

    fn project() -> Project {
        let config = ProjectConfig::default().with_device(
            DeviceConfig::new(1, "dev", 1)
                .with_item(ItemConfig::new(1, "a", RegisterKind::HoldingRegister, 0))
                .with_item(ItemConfig::new(2, "b", RegisterKind::HoldingRegister, 1)),
        );
        Project::from_config(&config).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn the_last_value_per_item_wins() {
        let project = project();
        let a = project.item(ItemId(1)).unwrap();
        let b = project.item(ItemId(2)).unwrap();
        let mut cache = WriteCache::default();

        cache.queue(a.clone(), Value::Int(1), 1, ROUTINE, false);
        cache.queue(b.clone(), Value::Int(2), 1, ROUTINE, false);
        cache.queue(a.clone(), Value::Int(3), 2, ROUTINE, false);
        assert_eq!(cache.len(), 2);

        let writes = cache.take();
        assert_eq!(writes[0].item.id(), ItemId(1));
        assert_eq!(writes[0].value, Value::Int(3));
        assert_eq!(writes[0].user_id, 2);
        assert_eq!(writes[1].value, Value::Int(2));
        assert!(cache.is_empty());
        assert!(!cache.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn routine_writes_restart_the_deadline() {
        let project = project();
        let a = project.item(ItemId(1)).unwrap();
        let mut cache = WriteCache::default();
        let start = Instant::now();

        cache.queue(a.clone(), Value::Int(1), 0, ROUTINE, false);
        tokio::time::advance(Duration::from_millis(30)).await;
        cache.queue(a.clone(), Value::Int(2), 0, ROUTINE, false);
        assert_eq!(
            cache.deadline(),
            Some(start + Duration::from_millis(30) + ROUTINE)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn priority_writes_only_bring_the_deadline_forward() {
        let project = project();
        let a = project.item(ItemId(1)).unwrap();
        let b = project.item(ItemId(2)).unwrap();
        let mut cache = WriteCache::default();
        let start = Instant::now();

        cache.queue(a.clone(), Value::Int(1), 0, ROUTINE, false);
        cache.queue(b.clone(), Value::Int(1), 0, PRIORITY, true);
        assert_eq!(cache.deadline(), Some(start + PRIORITY));

        // a routine write does not push a priority deadline back
        cache.queue(a.clone(), Value::Int(2), 0, ROUTINE, false);
        assert_eq!(cache.deadline(), Some(start + PRIORITY));

        cache.disarm();
        assert!(!cache.is_armed());
        assert_eq!(cache.len(), 2);
    }
}
