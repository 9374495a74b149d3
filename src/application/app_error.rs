use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found")]
    NotFound,

    /// Immediate premium activation needs a card on file first.
    #[error("No payment method on file")]
    NoPaymentMethod,

    /// Transport, auth or API failure talking to the billing processor.
    /// The mutation may still have happened server-side.
    #[error("Billing processor error: {0}")]
    Processor(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the same request might succeed if delivered again.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(_) | AppError::Processor(_) | AppError::Internal(_) => true,
            AppError::InvalidInput(_) | AppError::NotFound | AppError::NoPaymentMethod => false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ErrorCode {
    DatabaseError,
    InvalidInput,
    NotFound,
    NoPaymentMethod,
    ProcessorError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NoPaymentMethod => "NO_PAYMENT_METHOD",
            ErrorCode::ProcessorError => "PROCESSOR_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl From<&AppError> for ErrorCode {
    fn from(e: &AppError) -> Self {
        match e {
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::InvalidInput(_) => ErrorCode::InvalidInput,
            AppError::NotFound => ErrorCode::NotFound,
            AppError::NoPaymentMethod => ErrorCode::NoPaymentMethod,
            AppError::Processor(_) => ErrorCode::ProcessorError,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
