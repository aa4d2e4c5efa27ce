use std::time::{Duration, Instant};

/// A single deferred, one-shot action.
pub enum Action {
    StopSetupMode,
}

struct Entry {
    due: Instant,
    action: Action,
}

/// Single-threaded, one-shot deferred action list, polled from the main
/// loop between broker poll calls. Entries are few and short-lived (at
/// most one pending `stop_setup_mode` per inactive transition), so a
/// linear scan beats the bookkeeping of a min-heap.
#[derive(Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn schedule(&mut self, delay: Duration, action: Action) {
        self.entries.push(Entry {
            due: Instant::now() + delay,
            action,
        });
    }

    /// Remove and return every action whose due time has passed.
    pub fn drain_due(&mut self) -> Vec<Action> {
        let now = Instant::now();
        let mut due = Vec::new();
        let mut remaining = Vec::with_capacity(self.entries.len());

        for entry in self.entries.drain(..) {
            if entry.due <= now {
                due.push(entry.action);
            } else {
                remaining.push(entry);
            }
        }

        self.entries = remaining;
        due
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_only_due_entries() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Duration::from_secs(0), Action::StopSetupMode);
        scheduler.schedule(Duration::from_secs(60), Action::StopSetupMode);

        let due = scheduler.drain_due();
        assert_eq!(due.len(), 1);
        assert!(!scheduler.is_empty());
    }

    #[test]
    fn clear_discards_everything() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(Duration::from_secs(0), Action::StopSetupMode);
        scheduler.clear();
        assert!(scheduler.is_empty());
        assert!(scheduler.drain_due().is_empty());
    }
}
