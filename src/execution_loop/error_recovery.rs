//! Error Recovery
//!
//! Builds repair prompts from the failures of earlier attempts.

use crate::config::ContextPolicy;
use crate::execution_loop::error_classifier::SqlErrorClass;
use crate::execution_loop::r#loop::{Attempt, AttemptOutcome};
use serde::{Deserialize, Serialize};

/// Failure information handed back to the translator for the next try
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairContext {
    pub original_question: String,
    /// Empty when the failure happened before a query was produced
    pub failed_query: String,
    pub error_message: String,
}

impl RepairContext {
    /// Context for a failed attempt; `None` for a successful one.
    pub fn from_attempt(question: &str, attempt: &Attempt) -> Option<Self> {
        if attempt.outcome != AttemptOutcome::QueryError {
            return None;
        }
        Some(Self {
            original_question: question.to_string(),
            failed_query: attempt.generated_query.clone(),
            error_message: attempt.error_detail.clone().unwrap_or_default(),
        })
    }
}

/// Repair prompt builder
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorRecovery {
    policy: ContextPolicy,
}

impl ErrorRecovery {
    pub fn new(policy: ContextPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ContextPolicy {
        self.policy
    }

    /// Prompt for the next attempt given the attempts recorded so far.
    ///
    /// With no failed history this is the question itself.
    pub fn build_prompt(&self, question: &str, history: &[Attempt]) -> String {
        let Some((latest, earlier)) = history.split_last() else {
            return question.to_string();
        };
        let Some(context) = RepairContext::from_attempt(question, latest) else {
            return question.to_string();
        };

        let earlier = match self.policy {
            ContextPolicy::Bounded => &[][..],
            ContextPolicy::FullHistory => earlier,
        };
        self.build_recovery_prompt(&context, latest.error_class, earlier)
    }

    pub fn build_recovery_prompt(
        &self,
        context: &RepairContext,
        error_class: Option<SqlErrorClass>,
        earlier: &[Attempt],
    ) -> String {
        let mut parts = Vec::new();

        parts.push(format!("Question: {}", context.original_question));

        if context.failed_query.is_empty() {
            parts.push(format!(
                "The previous attempt produced no SQL query (error: '{}'). Answer the question with a single SQL statement.",
                context.error_message
            ));
        } else {
            parts.push(format!(
                "Fix this SQL query that failed with error '{}': {}",
                context.error_message, context.failed_query
            ));
        }

        if let Some(class) = error_class {
            parts.push(format!("Hint: {}", class.hint()));
        }

        let earlier_failures: Vec<String> = earlier
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::QueryError)
            .map(|a| {
                format!(
                    "{}. {} -> {}",
                    a.attempt_number,
                    if a.generated_query.is_empty() {
                        "(no query)"
                    } else {
                        a.generated_query.as_str()
                    },
                    a.error_detail.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        if !earlier_failures.is_empty() {
            parts.push("\nEarlier failed attempts:".to_string());
            parts.extend(earlier_failures);
        }

        parts.join("\n")
    }
}
