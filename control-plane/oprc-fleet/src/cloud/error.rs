use std::fmt;

/// Classification of a provider error code. Only the variants listed in a
/// retry whitelist are ever retried by [`crate::cloud::retry::with_retry`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SubnetNotFound,
    ResourceNotFound,
    PermissionDenied,
    Throttling,
    DependencyViolation,
    InvalidParameter,
    Other(String),
}

impl ErrorCode {
    /// Map a raw provider error code onto the classification.
    pub fn parse(code: &str) -> Self {
        match code {
            "InvalidSubnetID.NotFound" | "InvalidSubnetId.NotFound" => {
                ErrorCode::SubnetNotFound
            }
            "InvalidResourceID.NotFound" | "NotFound" | "NoSuchEntity" => {
                ErrorCode::ResourceNotFound
            }
            "UnauthorizedOperation" | "AccessDenied"
            | "AccessDeniedException" => ErrorCode::PermissionDenied,
            "Throttling" | "RequestLimitExceeded" | "ThrottlingException" => {
                ErrorCode::Throttling
            }
            "DependencyViolation" => ErrorCode::DependencyViolation,
            "InvalidParameterValue" | "InvalidParameterCombination" => {
                ErrorCode::InvalidParameter
            }
            other => ErrorCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::SubnetNotFound => "InvalidSubnetID.NotFound",
            ErrorCode::ResourceNotFound => "InvalidResourceID.NotFound",
            ErrorCode::PermissionDenied => "UnauthorizedOperation",
            ErrorCode::Throttling => "Throttling",
            ErrorCode::DependencyViolation => "DependencyViolation",
            ErrorCode::InvalidParameter => "InvalidParameterValue",
            ErrorCode::Other(code) => code.as_str(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by a cloud verb.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct CloudError {
    pub code: ErrorCode,
    pub message: String,
}

impl CloudError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Build from a raw provider code such as `InvalidSubnetID.NotFound`.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::parse(code), message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Other("InternalError".into()), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_codes() {
        assert_eq!(
            ErrorCode::parse("InvalidSubnetID.NotFound"),
            ErrorCode::SubnetNotFound
        );
        assert_eq!(
            ErrorCode::parse("UnauthorizedOperation"),
            ErrorCode::PermissionDenied
        );
        assert_eq!(
            ErrorCode::parse("RequestLimitExceeded"),
            ErrorCode::Throttling
        );
    }

    #[test]
    fn unknown_codes_keep_their_text() {
        let err = CloudError::from_code("VcpuLimitExceeded", "quota");
        assert_eq!(err.code, ErrorCode::Other("VcpuLimitExceeded".into()));
        assert_eq!(err.to_string(), "VcpuLimitExceeded: quota");
    }
}
