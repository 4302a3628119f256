//! Repair Loop
//!
//! Translate, execute, and on failure feed the store's error back into the
//! translator, bounded by an attempt budget.

use crate::config::EngineConfig;
use crate::error::{QuestionFailure, RepairError, Result, RetryExhausted};
use crate::execution_loop::error_classifier::{ErrorClassifier, SqlErrorClass};
use crate::execution_loop::error_recovery::ErrorRecovery;
use crate::llm::Translator;
use crate::store::{QueryOutput, QueryStore, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    RowsReturned,
    QueryError,
}

/// One translate + execute cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_number: u32,
    /// Empty when translation failed
    pub generated_query: String,
    pub outcome: AttemptOutcome,
    pub error_detail: Option<String>,
    pub error_class: Option<SqlErrorClass>,
    pub elapsed_ms: u64,
}

/// Rows of a successful run plus the query that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub query: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Every attempt of the run, the last one being the success
    pub attempts: Vec<Attempt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairState {
    Translating,
    Executing,
    Refining,
    Succeeded,
    Exhausted,
    Cancelled,
}

impl fmt::Display for RepairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

enum Step {
    Translate { prompt: String },
    Execute { query: String },
    Refine,
    Succeed { query: String, output: QueryOutput },
    Exhaust,
    Cancel,
}

impl Step {
    fn state(&self) -> RepairState {
        match self {
            Step::Translate { .. } => RepairState::Translating,
            Step::Execute { .. } => RepairState::Executing,
            Step::Refine => RepairState::Refining,
            Step::Succeed { .. } => RepairState::Succeeded,
            Step::Exhaust => RepairState::Exhausted,
            Step::Cancel => RepairState::Cancelled,
        }
    }
}

/// Per-attempt bookkeeping
struct AttemptClock {
    number: u32,
    started: Instant,
    deadline: Option<tokio::time::Instant>,
}

#[derive(Clone)]
pub struct RepairLoop {
    translator: Arc<dyn Translator>,
    store: Arc<dyn QueryStore>,
    config: EngineConfig,
    recovery: ErrorRecovery,
    classifier: ErrorClassifier,
    translation_permits: Arc<Semaphore>,
}

impl RepairLoop {
    pub fn new(
        translator: Arc<dyn Translator>,
        store: Arc<dyn QueryStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            translator,
            store,
            recovery: ErrorRecovery::new(config.context_policy),
            classifier: ErrorClassifier::new(),
            translation_permits: Arc::new(Semaphore::new(config.max_in_flight_translations)),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run with the configured budget and no external cancellation.
    pub async fn run(&self, question: &str) -> std::result::Result<ResultSet, QuestionFailure> {
        self.run_with(question, self.config.max_attempts, &CancellationToken::new())
            .await
    }

    /// Run one question to success, exhaustion or cancellation.
    ///
    /// A `max_attempts` of 0 is treated as 1.
    pub async fn run_with(
        &self,
        question: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> std::result::Result<ResultSet, QuestionFailure> {
        let max_attempts = max_attempts.max(1);
        let mut history: Vec<Attempt> = Vec::new();
        let mut clock = self.start_attempt(1);
        let mut step = Step::Translate {
            prompt: question.to_string(),
        };

        loop {
            debug!(
                attempt = clock.number,
                state = %step.state(),
                "Repair loop transition"
            );

            step = match step {
                Step::Translate { prompt } => {
                    info!("Attempt {} of {} - translating", clock.number, max_attempts);
                    match self.guarded(self.translate(&prompt), clock.deadline, cancel).await {
                        None => Step::Cancel,
                        Some(Ok(query)) => Step::Execute { query },
                        Some(Err(e)) => {
                            let class = match e {
                                RepairError::Timeout(_) => SqlErrorClass::Timeout,
                                _ => SqlErrorClass::Translation,
                            };
                            warn!("Attempt {} translation failed: {}", clock.number, e);
                            history.push(failed_attempt(&clock, String::new(), &e, class));
                            self.after_failure(&history, max_attempts)
                        }
                    }
                }
                Step::Execute { query } => {
                    info!("Attempt {} - Generated SQL: {}", clock.number, query);
                    match self.guarded(self.store.execute(&query), clock.deadline, cancel).await {
                        None => Step::Cancel,
                        Some(Ok(output)) => {
                            history.push(Attempt {
                                attempt_number: clock.number,
                                generated_query: query.clone(),
                                outcome: AttemptOutcome::RowsReturned,
                                error_detail: None,
                                error_class: None,
                                elapsed_ms: clock.elapsed_ms(),
                            });
                            Step::Succeed { query, output }
                        }
                        Some(Err(e)) => {
                            let class = match e {
                                RepairError::Timeout(_) => SqlErrorClass::Timeout,
                                _ => self.classifier.classify(&e.repair_signal()),
                            };
                            warn!("Attempt {} execution failed: {}", clock.number, e);
                            history.push(failed_attempt(&clock, query, &e, class));
                            self.after_failure(&history, max_attempts)
                        }
                    }
                }
                Step::Refine => {
                    let next = clock.number + 1;
                    let delay = self.config.pacing.delay_before(next);
                    debug!("Waiting {:?} before attempt {}", delay, next);
                    let paced = async {
                        tokio::time::sleep(delay).await;
                        Ok::<(), RepairError>(())
                    };
                    match self.guarded(paced, None, cancel).await {
                        None => Step::Cancel,
                        Some(_) => {
                            clock = self.start_attempt(next);
                            Step::Translate {
                                prompt: self.recovery.build_prompt(question, &history),
                            }
                        }
                    }
                }
                Step::Succeed { query, output } => {
                    info!(
                        "Question succeeded on attempt {} with {} row(s)",
                        clock.number,
                        output.rows.len()
                    );
                    return Ok(ResultSet {
                        query,
                        columns: output.columns,
                        rows: output.rows,
                        attempts: history,
                    });
                }
                Step::Exhaust => {
                    let last_error = history
                        .last()
                        .and_then(|a| a.error_detail.clone())
                        .unwrap_or_default();
                    warn!(
                        "Max retries ({}) reached. Last error: {}",
                        max_attempts, last_error
                    );
                    return Err(RetryExhausted {
                        question: question.to_string(),
                        attempts: history,
                        last_error,
                    }
                    .into());
                }
                Step::Cancel => {
                    info!("Question cancelled during attempt {}", clock.number);
                    return Err(QuestionFailure::Cancelled {
                        question: question.to_string(),
                        attempts: history,
                    });
                }
            };
        }
    }

    async fn translate(&self, prompt: &str) -> Result<String> {
        let _permit = self
            .translation_permits
            .acquire()
            .await
            .map_err(|e| RepairError::Translation(format!("translation limiter closed: {}", e)))?;
        let query = self.translator.translate(prompt).await?;
        let query = query.trim();
        if query.is_empty() {
            return Err(RepairError::Translation(
                "translator returned no usable text".to_string(),
            ));
        }
        Ok(query.to_string())
    }

    /// Await `fut` until `deadline`; `None` means cancelled.
    async fn guarded<F, T>(
        &self,
        fut: F,
        deadline: Option<tokio::time::Instant>,
        cancel: &CancellationToken,
    ) -> Option<Result<T>>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.config.attempt_timeout.unwrap_or_default();
        let bounded = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .unwrap_or(Err(RepairError::Timeout(limit))),
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = bounded => Some(result),
        }
    }

    fn start_attempt(&self, number: u32) -> AttemptClock {
        AttemptClock {
            number,
            started: Instant::now(),
            deadline: self
                .config
                .attempt_timeout
                .map(|limit| tokio::time::Instant::now() + limit),
        }
    }

    fn after_failure(&self, history: &[Attempt], max_attempts: u32) -> Step {
        if history.len() as u32 >= max_attempts {
            Step::Exhaust
        } else {
            Step::Refine
        }
    }
}

impl AttemptClock {
    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

fn failed_attempt(
    clock: &AttemptClock,
    query: String,
    error: &RepairError,
    class: SqlErrorClass,
) -> Attempt {
    Attempt {
        attempt_number: clock.number,
        generated_query: query,
        outcome: AttemptOutcome::QueryError,
        error_detail: Some(error.repair_signal()),
        error_class: Some(class),
        elapsed_ms: clock.elapsed_ms(),
    }
}
