use thiserror::Error;

/// Failure of the transport layer after both the direct request and the
/// relay fallback have been attempted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode JSON from {url}: {reason}")]
    Decode { url: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DashboardError {
    /// Neither fresh data nor any cached data exists for the requested view.
    #[error("No data available")]
    NoData,

    #[error("Unknown series: {0}")]
    UnknownSeries(String),
}
