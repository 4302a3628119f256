//! Batch Runner
//!
//! Runs the repair loop over independent questions. A failure for one
//! question is recorded in its own outcome and never stops the batch.

use crate::error::QuestionFailure;
use crate::execution_loop::{Attempt, RepairLoop, ResultSet};
use crate::store::Row;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub type QuestionOutcome = std::result::Result<ResultSet, QuestionFailure>;

/// Outcome of one question, in submission order
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub question: String,
    pub result: QuestionOutcome,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn attempts(&self) -> &[Attempt] {
        match &self.result {
            Ok(result_set) => &result_set.attempts,
            Err(failure) => failure.attempts(),
        }
    }
}

pub struct BatchRunner {
    repair: RepairLoop,
}

impl BatchRunner {
    pub fn new(repair: RepairLoop) -> Self {
        Self { repair }
    }

    /// Run every question one after the other.
    pub async fn run_all<S: AsRef<str>>(
        &self,
        questions: &[S],
        max_attempts: u32,
    ) -> Vec<BatchOutcome> {
        self.run_all_with(questions, max_attempts, &CancellationToken::new())
            .await
    }

    /// Sequential run observing `cancel`; questions not yet started when the
    /// token fires are reported as cancelled with no attempts.
    pub async fn run_all_with<S: AsRef<str>>(
        &self,
        questions: &[S],
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Vec<BatchOutcome> {
        let batch_id = Uuid::new_v4();
        info!(%batch_id, "Starting batch of {} question(s)", questions.len());

        let mut outcomes = Vec::with_capacity(questions.len());
        for (idx, question) in questions.iter().enumerate() {
            let question = question.as_ref();
            info!(%batch_id, "Question {}: {}", idx + 1, question);
            let result = self.repair.run_with(question, max_attempts, cancel).await;
            log_outcome(idx, &result);
            outcomes.push(BatchOutcome {
                question: question.to_string(),
                result,
            });
        }
        outcomes
    }

    /// Run questions on up to `max_concurrency` tasks at once.
    ///
    /// Each task owns one output slot; the returned order matches `questions`.
    pub async fn run_all_concurrent<S: AsRef<str>>(
        &self,
        questions: &[S],
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Vec<BatchOutcome> {
        let batch_id = Uuid::new_v4();
        let concurrency = self.repair.config().max_concurrency.max(1);
        info!(
            %batch_id,
            "Starting batch of {} question(s) with concurrency {}",
            questions.len(),
            concurrency
        );

        let limiter = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        let mut task_slots = HashMap::new();

        for (idx, question) in questions.iter().enumerate() {
            let question = question.as_ref().to_string();
            let repair = self.repair.clone();
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();

            let handle = tasks.spawn(async move {
                // The limiter is never closed, so acquisition only waits
                let _permit = limiter.acquire_owned().await.ok();
                let result = repair.run_with(&question, max_attempts, &cancel).await;
                (idx, result)
            });
            task_slots.insert(handle.id(), idx);
        }

        let mut slots: Vec<Option<QuestionOutcome>> = questions.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => {
                    log_outcome(idx, &result);
                    slots[idx] = Some(result);
                }
                Err(e) => {
                    error!(%batch_id, "Batch task failed: {}", e);
                    if let Some(&idx) = task_slots.get(&e.id()) {
                        slots[idx] = Some(Err(task_failure(questions[idx].as_ref(), &e)));
                    }
                }
            }
        }

        questions
            .iter()
            .zip(slots)
            .map(|(question, slot)| {
                let question = question.as_ref().to_string();
                let result = slot.unwrap_or_else(|| {
                    Err(QuestionFailure::Cancelled {
                        question: question.clone(),
                        attempts: Vec::new(),
                    })
                });
                BatchOutcome { question, result }
            })
            .collect()
    }
}

fn task_failure(question: &str, e: &tokio::task::JoinError) -> QuestionFailure {
    if e.is_cancelled() {
        return QuestionFailure::Cancelled {
            question: question.to_string(),
            attempts: Vec::new(),
        };
    }
    QuestionFailure::Aborted {
        question: question.to_string(),
        reason: format!("batch task failed: {}", e),
    }
}

fn log_outcome(idx: usize, result: &QuestionOutcome) {
    match result {
        Ok(result_set) => info!(
            "Question {} succeeded after {} attempt(s)",
            idx + 1,
            result_set.attempts.len()
        ),
        Err(failure) => warn!("Question {} failed: {}", idx + 1, failure),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Exhausted,
    Cancelled,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub question: String,
    pub status: OutcomeStatus,
    pub query: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub error: Option<String>,
    pub attempts: Vec<Attempt>,
}

/// Summary of a finished batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub generated_at: DateTime<Utc>,
    pub succeeded: usize,
    pub exhausted: usize,
    pub cancelled: usize,
    pub aborted: usize,
    pub total_attempts: usize,
    pub entries: Vec<ReportEntry>,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: &[BatchOutcome]) -> Self {
        let entries: Vec<ReportEntry> = outcomes
            .iter()
            .map(|outcome| match &outcome.result {
                Ok(result_set) => ReportEntry {
                    question: outcome.question.clone(),
                    status: OutcomeStatus::Succeeded,
                    query: Some(result_set.query.clone()),
                    columns: result_set.columns.clone(),
                    rows: result_set.rows.clone(),
                    error: None,
                    attempts: result_set.attempts.clone(),
                },
                Err(failure) => ReportEntry {
                    question: outcome.question.clone(),
                    status: match failure {
                        QuestionFailure::Exhausted(_) => OutcomeStatus::Exhausted,
                        QuestionFailure::Cancelled { .. } => OutcomeStatus::Cancelled,
                        QuestionFailure::Aborted { .. } => OutcomeStatus::Aborted,
                    },
                    query: None,
                    columns: Vec::new(),
                    rows: Vec::new(),
                    error: Some(failure.to_string()),
                    attempts: failure.attempts().to_vec(),
                },
            })
            .collect();

        let count = |status: OutcomeStatus| entries.iter().filter(|e| e.status == status).count();

        Self {
            generated_at: Utc::now(),
            succeeded: count(OutcomeStatus::Succeeded),
            exhausted: count(OutcomeStatus::Exhausted),
            cancelled: count(OutcomeStatus::Cancelled),
            aborted: count(OutcomeStatus::Aborted),
            total_attempts: entries.iter().map(|e| e.attempts.len()).sum(),
            entries,
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "\nQuestion: {}", entry.question)?;
            for attempt in &entry.attempts {
                let query = if attempt.generated_query.is_empty() {
                    "(no query)"
                } else {
                    attempt.generated_query.as_str()
                };
                match &attempt.error_detail {
                    Some(detail) => writeln!(
                        f,
                        "  Attempt {} - {} -> error: {}",
                        attempt.attempt_number, query, detail
                    )?,
                    None => writeln!(f, "  Attempt {} - {}", attempt.attempt_number, query)?,
                }
            }
            match entry.status {
                OutcomeStatus::Succeeded => {
                    writeln!(f, "  Results ({} row(s)):", entry.rows.len())?;
                    if !entry.columns.is_empty() {
                        writeln!(f, "    {}", entry.columns.join(" | "))?;
                    }
                    for row in &entry.rows {
                        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                        writeln!(f, "    {}", cells.join(" | "))?;
                    }
                }
                OutcomeStatus::Exhausted | OutcomeStatus::Cancelled | OutcomeStatus::Aborted => {
                    writeln!(
                        f,
                        "  Failed to execute: {}",
                        entry.error.as_deref().unwrap_or("unknown error")
                    )?;
                }
            }
        }
        write!(
            f,
            "\n{} succeeded, {} exhausted, {} cancelled, {} aborted ({} attempts)",
            self.succeeded, self.exhausted, self.cancelled, self.aborted, self.total_attempts
        )
    }
}
