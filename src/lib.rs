pub mod batch;
pub mod config;
pub mod error;
pub mod execution_loop;
pub mod llm;
pub mod seed;
pub mod store;

pub use batch::{BatchOutcome, BatchReport, BatchRunner};
pub use tokio_util::sync::CancellationToken;
pub use config::{ContextPolicy, EngineConfig, LlmConfig, RetryPacing};
pub use error::{QuestionFailure, RepairError, Result, RetryExhausted};
pub use execution_loop::{Attempt, AttemptOutcome, RepairContext, RepairLoop, RepairState, ResultSet};
pub use llm::{LlmTranslator, Translator};
pub use store::{QueryOutput, QueryStore, Row, SqliteStore, Value};
