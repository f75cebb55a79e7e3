//! Error types for finplay core

use thiserror::Error;

/// Result type alias for playback engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Playback engine error types
#[derive(Error, Debug)]
pub enum Error {
    // Negotiation errors
    #[error("Server returned no media sources for item {item_id}")]
    NoMediaSources { item_id: String },

    #[error("No viable delivery path for media source {media_source_id}")]
    NoViableDelivery { media_source_id: String },

    #[error("Server refused playback: {code}")]
    PlaybackRefused { code: String },

    #[error("Server response missing play session id")]
    MissingPlaySessionId,

    #[error("Media source {media_source_id} has no container")]
    MissingContainer { media_source_id: String },

    #[error("Media source {media_source_id} advertises transcoding without a URL")]
    MissingTranscodingUrl { media_source_id: String },

    // Manifest errors
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Manifest advertises no variants")]
    EmptyManifest,

    // Reporting errors
    #[error("Report rejected by server: {endpoint} returned {status}")]
    ReportRejected { endpoint: &'static str, status: u16 },

    #[error("Reporter closed; {0} report dropped")]
    ReporterClosed(&'static str),

    // Lifecycle errors
    #[error("Invalid playback state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Player rejected media source: {0}")]
    PlayerAttach(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if this error is recoverable
    ///
    /// Negotiation failures are terminal: a session that cannot agree on a
    /// delivery path is not retried automatically.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ManifestFetch(_)
                | Error::ManifestParse(_)
                | Error::EmptyManifest
                | Error::ReportRejected { .. }
                | Error::Network(_)
                | Error::ConnectionTimeout
        )
    }

    /// Returns true if this error ends a play request before playback starts
    pub fn is_negotiation_failure(&self) -> bool {
        matches!(
            self,
            Error::NoMediaSources { .. }
                | Error::NoViableDelivery { .. }
                | Error::PlaybackRefused { .. }
                | Error::MissingPlaySessionId
                | Error::MissingContainer { .. }
                | Error::MissingTranscodingUrl { .. }
        )
    }

    /// Returns the error code for logs and UI mapping
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NoMediaSources { .. } => "NO_MEDIA_SOURCES",
            Error::NoViableDelivery { .. } => "NO_VIABLE_DELIVERY",
            Error::PlaybackRefused { .. } => "PLAYBACK_REFUSED",
            Error::MissingPlaySessionId => "MISSING_PLAY_SESSION",
            Error::MissingContainer { .. } => "MISSING_CONTAINER",
            Error::MissingTranscodingUrl { .. } => "MISSING_TRANSCODING_URL",
            Error::ManifestFetch(_) => "MANIFEST_FETCH",
            Error::ManifestParse(_) => "MANIFEST_PARSE",
            Error::EmptyManifest => "EMPTY_MANIFEST",
            Error::ReportRejected { .. } => "REPORT_REJECTED",
            Error::ReporterClosed(_) => "REPORTER_CLOSED",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::PlayerAttach(_) => "PLAYER_ATTACH",
            Error::Network(_) => "NETWORK",
            Error::HttpStatus { .. } => "HTTP_STATUS",
            Error::ConnectionTimeout => "TIMEOUT",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Internal(_) => "INTERNAL",
            Error::Json(_) => "JSON",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_failures_are_terminal() {
        let err = Error::NoViableDelivery {
            media_source_id: "abc".into(),
        };
        assert!(err.is_negotiation_failure());
        assert!(!err.is_recoverable());
        assert_eq!(err.error_code(), "NO_VIABLE_DELIVERY");
    }

    #[test]
    fn manifest_failures_are_recoverable() {
        assert!(Error::EmptyManifest.is_recoverable());
        assert!(!Error::EmptyManifest.is_negotiation_failure());
    }
}
