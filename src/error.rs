use thiserror::Error;

/// Any error a callback can return.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Ways a scheduling request can fail.
///
/// Stopping early is not an error, see `Step::Stop`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("callback failed at {key}: {source}")]
    Callback { key: String, source: BoxError },

    #[error("job was cancelled")]
    Cancelled,

    #[error("host stopped making progress before the job completed")]
    Stalled,

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl Error {
    /// The error returned by the callback, if this is a callback failure.
    pub fn callback_error(&self) -> Option<&BoxError> {
        match self {
            Error::Callback { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[test]
fn error_messages() {
    let err = Error::Callback { key: "3".to_string(), source: "boom".into() };
    assert_eq!(err.to_string(), "callback failed at 3: boom");
    assert_eq!(err.callback_error().map(|e| e.to_string()), Some("boom".to_string()));

    assert_eq!(Error::Configuration("bad".into()).to_string(), "invalid configuration: bad");
    assert!(Error::Cancelled.is_cancelled());
    assert!(Error::Stalled.callback_error().is_none());
}
