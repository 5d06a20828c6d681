use std::fmt;

#[derive(Debug)]
pub enum CardError {
    FontResourceMissing(String),
    CanvasAllocation(String),
    Encoding(String),
    InvalidConfiguration(String),
    Io(std::io::Error),
}

impl fmt::Display for CardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardError::FontResourceMissing(message) => {
                write!(f, "font resource missing: {}", message)
            }
            CardError::CanvasAllocation(message) => {
                write!(f, "cannot allocate canvas: {}", message)
            }
            CardError::Encoding(message) => write!(f, "image encoding failed: {}", message),
            CardError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            CardError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for CardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CardError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CardError {
    fn from(value: std::io::Error) -> Self {
        CardError::Io(value)
    }
}

// Never leaves the crate: asset failures degrade to fallbacks.
#[derive(Debug)]
pub(crate) enum AssetError {
    Http(String),
    Status(u16),
    Decode(String),
    Io(std::io::Error),
    BudgetExhausted,
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::Http(message) => write!(f, "http request failed: {}", message),
            AssetError::Status(code) => write!(f, "unexpected http status {}", code),
            AssetError::Decode(message) => write!(f, "cannot decode image: {}", message),
            AssetError::Io(err) => write!(f, "io error: {}", err),
            AssetError::BudgetExhausted => write!(f, "asset budget exhausted"),
        }
    }
}

impl std::error::Error for AssetError {}

impl From<std::io::Error> for AssetError {
    fn from(value: std::io::Error) -> Self {
        AssetError::Io(value)
    }
}

impl AssetError {
    // Client errors other than 408/429 will not change on retry.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            AssetError::Http(_) => true,
            AssetError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            AssetError::Decode(_) | AssetError::Io(_) | AssetError::BudgetExhausted => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = CardError::FontResourceMissing("regular face".to_string());
        assert_eq!(err.to_string(), "font resource missing: regular face");
    }

    #[test]
    fn io_error_is_exposed_as_source() {
        let err: CardError = std::io::Error::other("disk full").into();
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn not_found_is_not_retried() {
        assert!(!AssetError::Status(404).is_retryable());
        assert!(AssetError::Status(503).is_retryable());
        assert!(AssetError::Status(429).is_retryable());
        assert!(AssetError::Http("timeout".into()).is_retryable());
    }
}
