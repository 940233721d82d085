//! Append-only targeting history
//!
//! History writes are best-effort: the coordinator appends after the primary
//! commit has landed and never lets a history problem surface to the caller.

use crate::model::TargetingEvent;

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

/// One page of a listing
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

/// Per-swap event log, newest last
pub struct HistoryLog {
    events: DashMap<Uuid, Vec<TargetingEvent>>,
    per_page: usize,
}

impl HistoryLog {
    pub fn new(per_page: usize) -> Self {
        Self {
            events: DashMap::new(),
            per_page: per_page.max(1),
        }
    }

    pub fn append(&self, event: TargetingEvent) {
        self.events
            .entry(event.source_swap_id)
            .or_default()
            .push(event);
    }

    /// List a swap's history, newest first. Pages are zero-indexed.
    pub fn list(&self, swap_id: Uuid, page: usize) -> Page<TargetingEvent> {
        let all = self
            .events
            .get(&swap_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let total = all.len();
        let items = all
            .into_iter()
            .rev()
            .skip(page * self.per_page)
            .take(self.per_page)
            .collect();
        Page {
            items,
            page,
            per_page: self.per_page,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TargetingEventKind;
    use chrono::Utc;

    fn event(source: Uuid, kind: TargetingEventKind) -> TargetingEvent {
        TargetingEvent {
            kind,
            source_swap_id: source,
            target_swap_id: Some(Uuid::new_v4()),
            actor_id: Uuid::new_v4(),
            at: Utc::now(),
        }
    }

    #[test]
    fn pages_newest_first() {
        let log = HistoryLog::new(2);
        let swap = Uuid::new_v4();
        log.append(event(swap, TargetingEventKind::Targeted));
        log.append(event(swap, TargetingEventKind::Retargeted));
        log.append(event(swap, TargetingEventKind::Removed));

        let first = log.list(swap, 0);
        assert_eq!(first.total, 3);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].kind, TargetingEventKind::Removed);

        let second = log.list(swap, 1);
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].kind, TargetingEventKind::Targeted);
    }

    #[test]
    fn unknown_swap_lists_empty() {
        let log = HistoryLog::new(10);
        let page = log.list(Uuid::new_v4(), 0);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
    }
}
