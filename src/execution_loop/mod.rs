pub mod error_classifier;
pub mod error_recovery;
pub mod r#loop;

pub use error_classifier::*;
pub use error_recovery::*;
pub use r#loop::*;
