//! History recording.
//!
//! Turns the outcome of one service step into an immutable [`History`]
//! record. Step numbers are taken from the execution's counter, so they stay
//! contiguous across suspensions and restarts; the record is persisted
//! together with the execution in the same commit.

use std::sync::Arc;

use uuid::Uuid;

use invoker::Payload;

use crate::clock::Clock;
use crate::models::{Execution, History};

/// What a step hands to the recorder.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub control: usize,
    pub service: Option<String>,
    pub request: Payload,
    /// Absent when the service produced no reply.
    pub response: Option<Payload>,
    /// Set when the step failed.
    pub failure: Option<String>,
}

pub struct HistoryRecorder {
    clock: Arc<dyn Clock>,
}

impl HistoryRecorder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Allocate the next step number of `execution` and snapshot its
    /// current (post-step) variables.
    pub fn record(&self, execution: &mut Execution, step: StepRecord) -> History {
        let step_number = execution.next_step;
        execution.next_step += 1;

        History {
            id: Uuid::new_v4(),
            execution_id: execution.id,
            step_number,
            control: step.control,
            service: step.service,
            request: step.request,
            response: step.response.unwrap_or_default(),
            local_snapshot: execution.variables.local.clone(),
            global_snapshot: execution.variables.global.clone(),
            failure: step.failure,
            executed_at: self.clock.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::variables::{ScopeKind, Variables};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn numbers_are_contiguous_and_snapshots_are_taken_at_record_time() {
        let now = Utc::now();
        let recorder = HistoryRecorder::new(Arc::new(FixedClock(now)));
        let mut exec = Execution::new(Uuid::new_v4(), Variables::default(), now);

        let step = |response, failure| StepRecord {
            control: 0,
            service: Some("echo".into()),
            request: Payload::json(&json!({})),
            response,
            failure,
        };

        exec.variables.write(ScopeKind::Local, "x", json!(1));
        let first = recorder.record(&mut exec, step(Some(Payload::json(&json!({ "ok": true }))), None));
        exec.variables.write(ScopeKind::Local, "x", json!(2));
        let second = recorder.record(&mut exec, step(None, Some("boom".to_string())));

        assert_eq!((first.step_number, second.step_number), (0, 1));
        assert_eq!(exec.next_step, 2);
        assert_eq!(first.local_snapshot.get("x"), Some(&json!(1)));
        assert_eq!(second.local_snapshot.get("x"), Some(&json!(2)));
        assert_eq!(first.failure, None);
        assert_eq!(second.failure.as_deref(), Some("boom"));
        assert!(second.response.data.is_empty());
        assert_eq!(first.executed_at, now);
    }
}
