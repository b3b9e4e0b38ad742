//! Checks applied to incoming requests before dispatch.

use crate::types::{ServiceError, ServiceResult};

/// Reject method names no handler could ever be registered under.
pub fn validate_method(method: &str) -> ServiceResult<()> {
    if method.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(
            "Method name must not be empty".to_string(),
        ));
    }

    if method.starts_with("rpc.") {
        return Err(ServiceError::InvalidRequest(format!(
            "Method names beginning with \"rpc.\" are reserved: {method}"
        )));
    }

    Ok(())
}
