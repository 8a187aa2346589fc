//! Error classification for the bus runtime (spec §7).
//!
//! Every surfaced failure carries a classification tag (the enum variant)
//! and a human-readable message, matching the taxonomy the runtime is
//! built around: `Configuration`, `Producer`, `Consumer`, `Serialization`,
//! `Transport`, `Timeout`, `Cancelled`, `Disposed`, `Handler`.

/// Errors surfaced by the bus runtime.
#[derive(Debug)]
pub enum BusError {
    /// Detected at build or construction time; always fatal to startup.
    Configuration(String),
    /// No producer declared for a type, or path resolution failed.
    Producer(String),
    /// No consumer settings resolve for an inbound envelope's type or path
    /// (spec §4.1, §4.6 step 1).
    Consumer(String),
    /// Encode/decode failure.
    Serialization(String),
    /// Transport produce or subscribe I/O failure.
    Transport(Box<dyn std::error::Error + Send + Sync>),
    /// Pending request deadline exceeded.
    Timeout(String),
    /// The caller's cancellation signal fired.
    Cancelled,
    /// Operation attempted on a torn-down bus.
    Disposed,
    /// User consumer/handler code failed.
    Handler(String),
}

impl BusError {
    /// Construct a `Transport` variant from any error type.
    ///
    /// Used by transport adapter crates (e.g. `omnibus-memory`) to wrap
    /// driver-specific errors without the core depending on their types.
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        BusError::Transport(Box::new(err))
    }

    /// The short classification tag used in logs and test assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            BusError::Configuration(_) => "Configuration",
            BusError::Producer(_) => "Producer",
            BusError::Consumer(_) => "Consumer",
            BusError::Serialization(_) => "Serialization",
            BusError::Transport(_) => "Transport",
            BusError::Timeout(_) => "Timeout",
            BusError::Cancelled => "Cancelled",
            BusError::Disposed => "Disposed",
            BusError::Handler(_) => "Handler",
        }
    }
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            BusError::Producer(msg) => write!(f, "Producer error: {msg}"),
            BusError::Consumer(msg) => write!(f, "Consumer error: {msg}"),
            BusError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BusError::Transport(err) => write!(f, "Transport error: {err}"),
            BusError::Timeout(msg) => write!(f, "Timeout: {msg}"),
            BusError::Cancelled => write!(f, "Operation cancelled"),
            BusError::Disposed => write!(f, "Bus has been disposed"),
            BusError::Handler(msg) => write!(f, "Handler error: {msg}"),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BusError::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Result alias used throughout the runtime.
pub type Result<T> = std::result::Result<T, BusError>;

/// Reconstructs a `BusError` carried across the wire as a classification
/// tag plus message (the `ErrorKind`/`ErrorMessage` headers an error reply
/// carries, spec §4.6 step 5). A wire failure has no live backtrace, so an
/// unrecognised or non-reconstructible kind collapses to `Handler`.
pub fn from_wire(kind: &str, message: String) -> BusError {
    match kind {
        "Configuration" => BusError::Configuration(message),
        "Producer" => BusError::Producer(message),
        "Consumer" => BusError::Consumer(message),
        "Serialization" => BusError::Serialization(message),
        "Timeout" => BusError::Timeout(message),
        "Cancelled" => BusError::Cancelled,
        "Disposed" => BusError::Disposed,
        _ => BusError::Handler(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_display_and_kind() {
        let err = BusError::Configuration("RequestX declared more than once".into());
        assert_eq!(err.kind(), "Configuration");
        assert!(err.to_string().contains("declared more than once"));
    }

    #[test]
    fn transport_error_wraps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "broker unreachable");
        let err = BusError::transport(io_err);
        assert_eq!(err.kind(), "Transport");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn cancelled_and_disposed_are_fixed_messages() {
        assert_eq!(BusError::Cancelled.to_string(), "Operation cancelled");
        assert_eq!(BusError::Disposed.to_string(), "Bus has been disposed");
    }
}
