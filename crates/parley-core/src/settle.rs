//! Deferred reconciliation of transport subscriptions after sync.
//!
//! A burst of sync payloads usually touches many chats at once. Instead of
//! joining and leaving topics after every payload, handlers note the chat
//! IDs here and the settle loop applies them once the burst is over: after
//! a quiet period without new notes, or after a bounded maximum wait.

use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleState {
    Idle,
    /// Chats are being noted. Times are in ms.
    Collecting { started_at: u64, last_noted_at: u64 },
    /// A batch was handed out and is being applied.
    Settling,
}

#[derive(Debug)]
pub struct SyncSettler {
    quiet_ms: u64,
    max_wait_ms: u64,
    state: SettleState,
    pending: BTreeSet<String>,
}

impl SyncSettler {
    pub fn new(quiet: Duration, max_wait: Duration) -> Self {
        Self {
            quiet_ms: quiet.as_millis() as u64,
            max_wait_ms: max_wait.as_millis() as u64,
            state: SettleState::Idle,
            pending: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> SettleState {
        self.state
    }

    /// Record chats whose subscriptions must be reconciled.
    pub fn note(&mut self, chat_ids: impl IntoIterator<Item = String>, now: u64) {
        let before = self.pending.len();
        self.pending.extend(chat_ids);
        if self.pending.len() == before {
            return;
        }
        self.state = match self.state {
            SettleState::Idle => SettleState::Collecting {
                started_at: now,
                last_noted_at: now,
            },
            SettleState::Collecting { started_at, .. } => SettleState::Collecting {
                started_at,
                last_noted_at: now,
            },
            // Picked up by `finish`.
            SettleState::Settling => SettleState::Settling,
        };
    }

    /// Hand out the pending batch once the quiet period or the maximum wait
    /// has elapsed.
    pub fn poll(&mut self, now: u64) -> Option<Vec<String>> {
        let SettleState::Collecting {
            started_at,
            last_noted_at,
        } = self.state
        else {
            return None;
        };
        let quiet = now.saturating_sub(last_noted_at) >= self.quiet_ms;
        let overdue = now.saturating_sub(started_at) >= self.max_wait_ms;
        if !quiet && !overdue {
            return None;
        }
        self.state = SettleState::Settling;
        Some(std::mem::take(&mut self.pending).into_iter().collect())
    }

    /// Return chats of a handed-out batch that were not applied. They go
    /// out again with the next batch.
    pub fn requeue(&mut self, chat_ids: impl IntoIterator<Item = String>) {
        self.pending.extend(chat_ids);
    }

    /// Mark the handed-out batch as applied.
    pub fn finish(&mut self, now: u64) {
        if self.state != SettleState::Settling {
            return;
        }
        self.state = if self.pending.is_empty() {
            SettleState::Idle
        } else {
            SettleState::Collecting {
                started_at: now,
                last_noted_at: now,
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settler() -> SyncSettler {
        SyncSettler::new(Duration::from_millis(100), Duration::from_millis(500))
    }

    #[test]
    fn test_waits_for_quiet_period() {
        let mut s = settler();
        assert_eq!(s.poll(0), None);

        s.note(["a".to_string()], 1_000);
        assert_eq!(s.poll(1_050), None);
        s.note(["b".to_string()], 1_080);
        assert_eq!(s.poll(1_150), None);

        let batch = s.poll(1_180).unwrap();
        assert_eq!(batch, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(s.state(), SettleState::Settling);

        s.finish(1_200);
        assert_eq!(s.state(), SettleState::Idle);
    }

    #[test]
    fn test_bounded_by_max_wait_under_constant_activity() {
        let mut s = settler();
        let mut now = 0;
        let mut released = None;
        while released.is_none() {
            s.note([format!("chat-{now}")], now);
            now += 50;
            released = s.poll(now);
        }
        assert_eq!(now, 500);
        assert_eq!(released.unwrap().len(), 10);
    }

    #[test]
    fn test_notes_during_settling_start_a_new_round() {
        let mut s = settler();
        s.note(["a".to_string()], 0);
        let _ = s.poll(100).unwrap();

        s.note(["b".to_string()], 110);
        assert_eq!(s.poll(500), None);
        s.finish(120);
        assert!(matches!(s.state(), SettleState::Collecting { .. }));
        assert_eq!(s.poll(220).unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_requeued_batch_is_handed_out_again() {
        let mut s = settler();
        s.note(["a".to_string(), "b".to_string()], 0);
        let batch = s.poll(100).unwrap();

        s.requeue(batch);
        s.finish(150);
        assert_eq!(
            s.state(),
            SettleState::Collecting {
                started_at: 150,
                last_noted_at: 150
            }
        );
        assert_eq!(s.poll(200), None);
        assert_eq!(s.poll(250).unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_duplicate_notes_do_not_extend_the_wait() {
        let mut s = settler();
        s.note(["a".to_string()], 0);
        s.note(["a".to_string()], 90);
        assert!(s.poll(100).is_some());
    }
}
