//! Error types for the BSP client stack

/// Result type alias
pub type Result<T> = std::result::Result<T, BspError>;

/// BSP error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum BspError {
    /// Socket could not be opened (refused, unreachable)
    #[error("Connection failed: {0}")]
    Connect(#[source] std::io::Error),

    /// Malformed length prefix or body length
    #[error("Framing error: {0}")]
    Framing(String),

    /// Garbled length prefix on the wire; the next frame boundary is unknown
    #[error("Lost frame alignment: {0}")]
    Desync(String),

    /// Invalid JSON or missing/invalid header field
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Header could not be encoded within protocol limits
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Peer closed or read/write failed mid-exchange
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect or discovery deadline exceeded
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Discovery found no appliance
    #[error("Appliance not found: {0}")]
    NotFound(String),

    /// A request was issued while another exchange is still in flight
    #[error("Session busy: an exchange is already in flight")]
    Busy,

    /// A request was issued on a closed session
    #[error("Session closed")]
    Closed,
}

/// Coarse error classification carried by `FrameEvent::ProtocolFault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Connect,
    Framing,
    Desync,
    Protocol,
    Encoding,
    Io,
    Timeout,
    NotFound,
    Busy,
    Closed,
}

impl BspError {
    /// Errors that tear down the session. Everything else aborts only the
    /// current exchange and leaves the connection usable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BspError::Io(_) | BspError::Desync(_) | BspError::Closed)
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            BspError::Connect(_) => FaultKind::Connect,
            BspError::Framing(_) => FaultKind::Framing,
            BspError::Desync(_) => FaultKind::Desync,
            BspError::Protocol(_) => FaultKind::Protocol,
            BspError::Encoding(_) => FaultKind::Encoding,
            BspError::Io(_) => FaultKind::Io,
            BspError::Timeout(_) => FaultKind::Timeout,
            BspError::NotFound(_) => FaultKind::NotFound,
            BspError::Busy => FaultKind::Busy,
            BspError::Closed => FaultKind::Closed,
        }
    }
}

impl From<serde_json::Error> for BspError {
    fn from(e: serde_json::Error) -> Self {
        BspError::Protocol(e.to_string())
    }
}
