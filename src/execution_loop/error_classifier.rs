//! Error Classifier
//!
//! Sorts store failure text into a coarse taxonomy. The class is kept on each
//! attempt for diagnostics and selects a hint line in the repair prompt; the
//! raw message itself is always forwarded unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlErrorClass {
    ColumnNotFound,
    TableNotFound,
    AmbiguousColumn,
    SyntaxError,
    InvalidAggregation,
    UnknownFunction,
    ConstraintViolation,
    Translation,
    Timeout,
    Other,
}

impl SqlErrorClass {
    /// One-line repair hint for the translator.
    pub fn hint(&self) -> &'static str {
        match self {
            SqlErrorClass::ColumnNotFound => {
                "A referenced column does not exist. Use only columns from the schema."
            }
            SqlErrorClass::TableNotFound => {
                "A referenced table does not exist. Use only tables from the schema."
            }
            SqlErrorClass::AmbiguousColumn => {
                "A column name is ambiguous. Qualify it with its table name."
            }
            SqlErrorClass::SyntaxError => "The statement is not valid SQL. Fix the syntax.",
            SqlErrorClass::InvalidAggregation => {
                "An aggregate is misused. Check GROUP BY and HAVING clauses."
            }
            SqlErrorClass::UnknownFunction => {
                "A function is not available in this database. Use a supported one."
            }
            SqlErrorClass::ConstraintViolation => {
                "The statement violates a constraint. Produce a read-only query."
            }
            SqlErrorClass::Translation => "No query was produced. Return a single SQL statement.",
            SqlErrorClass::Timeout => "The query took too long. Produce a simpler query.",
            SqlErrorClass::Other => "Review the query and fix the reported problem.",
        }
    }
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlErrorClass::ColumnNotFound => "ColumnNotFound",
            SqlErrorClass::TableNotFound => "TableNotFound",
            SqlErrorClass::AmbiguousColumn => "AmbiguousColumn",
            SqlErrorClass::SyntaxError => "SyntaxError",
            SqlErrorClass::InvalidAggregation => "InvalidAggregation",
            SqlErrorClass::UnknownFunction => "UnknownFunction",
            SqlErrorClass::ConstraintViolation => "ConstraintViolation",
            SqlErrorClass::Translation => "Translation",
            SqlErrorClass::Timeout => "Timeout",
            SqlErrorClass::Other => "Other",
        };
        write!(f, "{}", name)
    }
}

/// Error classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a store failure message
    pub fn classify(&self, message: &str) -> SqlErrorClass {
        let msg = message.to_lowercase();

        if msg.contains("ambiguous column") {
            return SqlErrorClass::AmbiguousColumn;
        }

        if msg.contains("no such column")
            || (msg.contains("column") && (msg.contains("not found") || msg.contains("does not exist")))
        {
            return SqlErrorClass::ColumnNotFound;
        }

        if msg.contains("no such table")
            || (msg.contains("table") && (msg.contains("not found") || msg.contains("does not exist")))
        {
            return SqlErrorClass::TableNotFound;
        }

        if msg.contains("no such function") {
            return SqlErrorClass::UnknownFunction;
        }

        if msg.contains("aggregate") {
            return SqlErrorClass::InvalidAggregation;
        }

        if msg.contains("syntax error") || msg.contains("incomplete input") {
            return SqlErrorClass::SyntaxError;
        }

        if msg.contains("constraint failed") || msg.contains("readonly") {
            return SqlErrorClass::ConstraintViolation;
        }

        if msg.contains("timed out") {
            return SqlErrorClass::Timeout;
        }

        SqlErrorClass::Other
    }
}
