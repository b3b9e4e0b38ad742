//! Core data types for parsed scripts, batches, and execution results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A zero-based position in the script text. Columns count characters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// One `GO`-delimited unit of T-SQL, executed as a single server round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Batch text with SQLCMD variables already substituted.
    pub text: String,
    pub start_line: u32,
    pub start_column: u32,
    /// Exclusive end position.
    pub end_line: u32,
    pub end_column: u32,
    /// Number of times to execute the batch (`GO 5`).
    pub repeat_count: u32,
}

impl Batch {
    pub fn start(&self) -> Position {
        Position::new(self.start_line, self.start_column)
    }

    pub fn end(&self) -> Position {
        Position::new(self.end_line, self.end_column)
    }
}

/// What to do when a batch fails (`:on error exit|ignore`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorAction {
    #[default]
    Ignore,
    Exit,
}

/// Parser configuration.
#[derive(Debug, Clone, Default)]
pub struct ParserOptions {
    /// Recognise `:setvar`, `:on error` and `$(name)` substitution.
    pub sqlcmd_mode: bool,
    /// Variables defined before the script starts.
    pub variables: HashMap<String, String>,
}

impl ParserOptions {
    pub fn sqlcmd() -> Self {
        Self {
            sqlcmd_mode: true,
            variables: HashMap::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

/// The output of parsing a whole script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedScript {
    pub batches: Vec<Batch>,
    pub on_error: ErrorAction,
}

/// Outcome of a single batch execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchExecutionResult {
    Success,
    Failure,
    Cancel,
    Timeout,
}

/// Outcome of a whole script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptExecutionResult {
    /// Every batch succeeded.
    Success,
    /// At least one batch failed, or the script did not parse.
    Failure,
    /// A batch failed while the error action was `exit`.
    Halted,
    Cancel,
    Timeout,
}

/// What an executor reports back for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutput {
    /// Informational messages (PRINT output, row counts, warnings).
    pub messages: Vec<String>,
    pub rows_affected: Option<u64>,
}

impl BatchOutput {
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.rows_affected = Some(rows);
        self
    }
}

/// Errors raised while parsing or executing a script.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("Incorrect syntax was encountered while parsing GO at line {}", .line + 1)]
    InvalidGo { line: u32 },

    #[error("Invalid GO repeat count '{value}' at line {}", .line + 1)]
    InvalidRepeatCount { line: u32, value: String },

    #[error("'{name}' scripting variable not defined (line {})", .line + 1)]
    VariableNotDefined { line: u32, name: String },

    #[error("Invalid scripting variable name '{name}' at line {}", .line + 1)]
    InvalidVariableName { line: u32, name: String },

    #[error("Syntax error in ':{command}' command at line {}: {message}", .line + 1)]
    InvalidCommand {
        line: u32,
        command: String,
        message: String,
    },

    #[error("Unsupported SQLCMD command ':{command}' at line {}", .line + 1)]
    UnsupportedCommand { line: u32, command: String },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Execution cancelled")]
    Cancelled,
}

impl BatchError {
    /// True for errors that come from reading the script rather than running it.
    pub fn is_parse_error(&self) -> bool {
        !matches!(self, BatchError::Execution(_) | BatchError::Cancelled)
    }
}

/// Convenience result type.
pub type BatchResult<T> = Result<T, BatchError>;
