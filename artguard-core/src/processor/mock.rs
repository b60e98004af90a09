//! Scripted processor for testing.
//! WARNING: Do not use in production - it never processes anything!

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ProcessorAck, ProcessorClient, ProcessorFailure, ProcessorSubmission};

/// Scripted outcome for the next submission.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Acknowledge, echoing the gateway job id with a prefix.
    Accept,
    Fail(ProcessorFailure),
    /// Sleep before acknowledging. Useful to drive client-side timeouts.
    Delay(Duration),
}

/// Processor double that replays scripted outcomes, then falls back to a
/// default (accept unless told otherwise).
#[derive(Default)]
pub struct ScriptedProcessor {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<ProcessorFailure>>,
    probe_down: AtomicBool,
    attempts: AtomicUsize,
    received: Mutex<Vec<ProcessorSubmission>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes consumed one per submission.
    pub fn push(&self, outcome: Scripted) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
        self
    }

    /// Make every unscripted submission fail with `failure`, or accept when
    /// `None`.
    pub fn set_fallback(&self, failure: Option<ProcessorFailure>) {
        *self.fallback.lock().unwrap_or_else(|e| e.into_inner()) = failure;
    }

    pub fn set_probe_ok(&self, ok: bool) {
        self.probe_down.store(!ok, Ordering::SeqCst);
    }

    /// Number of submissions that reached the processor.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<ProcessorSubmission> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_outcome(&self) -> Scripted {
        if let Some(next) = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return next;
        }
        match self
            .fallback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            Some(failure) => Scripted::Fail(failure),
            None => Scripted::Accept,
        }
    }
}

fn ack_for(submission: &ProcessorSubmission) -> ProcessorAck {
    ProcessorAck {
        job_id: format!("proc-{}", submission.job_id),
        status: Some("accepted".to_string()),
    }
}

#[async_trait]
impl ProcessorClient for ScriptedProcessor {
    async fn submit(
        &self,
        submission: &ProcessorSubmission,
    ) -> Result<ProcessorAck, ProcessorFailure> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(submission.clone());

        match self.next_outcome() {
            Scripted::Accept => Ok(ack_for(submission)),
            Scripted::Fail(failure) => Err(failure),
            Scripted::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(ack_for(submission))
            }
        }
    }

    async fn probe(&self) -> Result<(), ProcessorFailure> {
        if self.probe_down.load(Ordering::SeqCst) {
            Err(ProcessorFailure::Connect("scripted probe failure".into()))
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
