//! Processors with scripted behaviour.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use relay_delivery::{ProcessingError, ProcessingInput, Processor};

/// One scripted processor outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Return this text.
    Reply(String),
    /// Fail with this message.
    Fail(String),
    /// Panic with this message.
    Panic(String),
    /// Return this text after a real-time delay.
    Delayed(Duration, String),
}

/// Processor that plays back a script, then repeats a fallback step.
///
/// Clones share the script and the call log.
#[derive(Debug, Clone)]
pub struct ScriptedProcessor {
    script: Arc<Mutex<VecDeque<Step>>>,
    fallback: Step,
    calls: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<ProcessingInput>>>,
}

impl ScriptedProcessor {
    /// Plays `script` in order, then repeats `fallback`.
    pub fn new(script: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always replies with `text`.
    pub fn replying(text: impl Into<String>) -> Self {
        Self::new([], Step::Reply(text.into()))
    }

    /// Always fails.
    pub fn failing() -> Self {
        Self::new([], Step::Fail("scripted failure".to_string()))
    }

    /// Number of times `process` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    /// Inputs seen so far, in call order.
    pub fn inputs(&self) -> Vec<ProcessingInput> {
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Processor for ScriptedProcessor {
    async fn process(&self, input: &ProcessingInput) -> Result<String, ProcessingError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner).push(input.clone());

        match self.next_step() {
            Step::Reply(text) => Ok(text),
            Step::Fail(message) => Err(ProcessingError::failed(message)),
            Step::Panic(message) => panic!("{message}"),
            Step::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            },
        }
    }
}
