use serde::Serialize;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Manual code rejected because an already-applied discount of the
    /// named category does not combine with it.
    #[error("Discount conflict: {0}")]
    DiscountConflict(String),

    /// Submitted order disagrees with authoritative prices, stock, or
    /// discount rules. Terminal for the submission; the detail stays in
    /// server logs.
    #[error("Price verification failed: {0}")]
    PriceVerification(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Message suitable for client responses. Verification failures and
    /// internal errors return generic text so authoritative prices and
    /// implementation details never leak back to the submitter.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::EventError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::PriceVerification(_) => {
                "Order verification failed. Please refresh your cart and retry checkout."
                    .to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_failures_hide_the_reason() {
        let err = ServiceError::PriceVerification(
            "unit price 25.00 disagrees with catalog price 29.99".to_string(),
        );
        let message = err.response_message();
        assert!(!message.contains("29.99"));
        assert!(message.contains("retry checkout"));
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ServiceError::InternalError("connection pool exhausted".to_string());
        assert_eq!(err.response_message(), "Internal server error");
    }

    #[test]
    fn user_facing_errors_keep_their_message() {
        let err = ServiceError::NotFound("Order not found".to_string());
        assert_eq!(err.response_message(), "Not found: Order not found");

        let err = ServiceError::DiscountConflict(
            "cannot be combined with the order discount already applied".to_string(),
        );
        assert!(err.response_message().contains("order discount"));
    }
}
