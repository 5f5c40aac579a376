use thiserror::Error;

/// Error kinds recognized by the backtesting core. Display strings double
/// as the human-readable diagnostics surfaced in `validation_error`.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Tier validation failed: {0}")]
    TierValidation(String),

    #[error("Evaluator error: {0}")]
    Evaluator(String),

    #[error("Arithmetic invariant violated: {0}")]
    ArithmeticInvariant(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("cancelled")]
    Cancelled,
}
