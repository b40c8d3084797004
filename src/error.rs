use std::{any::Any, fmt::Debug, sync::Arc, time::Duration};

type Source = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The failure carried by a promise.
///
/// An error is a human readable `description`, an optional failure `reason`
/// and optionally the foreign error that caused it. It is cheap to clone, as
/// one failure is handed to every handler and dependent of a promise.
///
/// # Examples
///
/// ```
/// use promise_chain::Error;
///
/// let error = Error::new("cannot load avatar").with_reason("http 404");
/// assert_eq!(error.to_string(), "cannot load avatar");
/// assert_eq!(error.reason(), Some("http 404"));
/// ```
#[derive(Debug, Clone, thiserror::Error)]
#[error("{description}")]
pub struct Error {
    description: String,
    reason: Option<String>,
    #[source]
    source: Option<Source>,
}

impl Error {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            reason: None,
            source: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Wraps a foreign error, keeping it reachable through
    /// [`std::error::Error::source`].
    pub fn from_source<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            description: error.to_string(),
            reason: None,
            source: Some(Arc::new(error)),
        }
    }

    /// A producer signaled completion with neither a value nor an error.
    pub fn invalid_result() -> Self {
        Self::new("invalid result").with_reason("completed without a value or an error")
    }

    /// A promise was still pending when its deadline passed.
    pub fn timeout(after: Duration) -> Self {
        Self::new("timed out").with_reason(format!("no result or error after {after:?}"))
    }

    /// Default error for a manual drop.
    pub fn dropped() -> Self {
        Self::new("dropping task").with_reason("manual drop call")
    }

    /// A resolver went away without settling its promise.
    pub fn producer_dropped() -> Self {
        Self::new("producer dropped").with_reason("resolver dropped before settling")
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_owned()
        };
        Self::new("step panicked").with_reason(message)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use std::error::Error as _;
    use std::time::Duration;

    #[test]
    fn test_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error = Error::from_source(io);
        assert_eq!(error.description(), "no such file");
        assert!(error.source().is_some());
        assert!(error.clone().source().is_some());
    }

    #[test]
    fn test_timeout_mentions_deadline() {
        let error = Error::timeout(Duration::from_millis(100));
        assert_eq!(error.description(), "timed out");
        assert!(error.reason().unwrap().contains("100ms"));
    }

    #[test]
    fn test_panic_payloads() {
        let error = Error::panicked(Box::new("boom"));
        assert_eq!(error.reason(), Some("boom"));
        let error = Error::panicked(Box::new(String::from("kaboom")));
        assert_eq!(error.reason(), Some("kaboom"));
        let error = Error::panicked(Box::new(7_u8));
        assert_eq!(error.reason(), Some("unknown panic payload"));
    }
}
