//! Timer list ordered by due instant.
//!
//! Entries with equal deadlines keep their arrival order: a new task goes in
//! front of the first entry that is due strictly later than it.

use crate::runtime::task::Task;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct TimerList {
    entries: VecDeque<Task>,
}

impl TimerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted, stable insert.
    pub fn insert(&mut self, task: Task) {
        let due = task.due();
        let index = self.entries.partition_point(|entry| entry.due() <= due);
        self.entries.insert(index, task);
    }

    /// Pop the head if it was due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Task> {
        if self.entries.front()?.due() <= now {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// How long until the head is due; `None` when the list is empty.
    pub fn next_wait(&self) -> Option<Duration> {
        self.entries.front().map(Task::time_to_execution)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Task> + '_ {
        self.entries.drain(..)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled(source: &str, delay_ms: u64) -> Task {
        Task::script(source, None).with_delay(Duration::from_millis(delay_ms))
    }

    fn source_of(task: &Task) -> String {
        match task.kind() {
            crate::runtime::task::TaskKind::Script(script) => script.source().to_owned(),
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_deadlines_keep_arrival_order() {
        let mut timers = TimerList::new();
        timers.insert(labelled("first", 5));
        timers.insert(labelled("second", 5));
        timers.insert(labelled("late", 10));
        timers.insert(labelled("early", 1));

        tokio::time::advance(Duration::from_millis(10)).await;
        let now = Instant::now();
        let order: Vec<_> = std::iter::from_fn(|| timers.pop_due(now))
            .map(|task| source_of(&task))
            .collect();
        assert_eq!(order, vec!["early", "first", "second", "late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_due_respects_instant() {
        let mut timers = TimerList::new();
        timers.insert(labelled("soon", 5));
        assert!(timers.pop_due(Instant::now()).is_none());
        assert_eq!(timers.next_wait(), Some(Duration::from_millis(5)));

        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(timers.next_wait(), Some(Duration::ZERO));
        assert!(timers.pop_due(Instant::now()).is_some());
        assert_eq!(timers.next_wait(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduled_entry_goes_after_equal_peers() {
        let mut timers = TimerList::new();
        let mut interval = labelled("interval", 5);
        timers.insert(labelled("other", 10));

        tokio::time::advance(Duration::from_millis(5)).await;
        assert!(timers.pop_due(Instant::now()).is_none());
        interval.reset_scheduled_time();
        timers.insert(interval);

        let sources: Vec<_> = timers.drain().map(|task| source_of(&task)).collect();
        assert_eq!(sources, vec!["other", "interval"]);
    }
}
