//! Error types for the KNXnet/IP stack.
//!
//! One structured error type per failure family: decode failures, peer
//! protocol violations, timeouts, socket faults, security faults and fatal
//! conditions. Parse errors never escape the stack as panics; corrupt frames
//! are dropped with a diagnostic and surface here only when an operation
//! cannot continue without the frame.

use core::fmt;

#[cfg(feature = "std")]
use std::backtrace::Backtrace;

/// Result type alias for all stack operations.
pub type Result<T> = core::result::Result<T, KnxError>;

// =============================================================================
// Error Kind Enums
// =============================================================================

/// Local decode failures. The offending frame is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseErrorKind {
    /// Header octets are not `06 10` or the header is shorter than 6 octets.
    WrongHeader,
    /// The 16-bit service type is not a recognized family member.
    UnknownServiceType,
    /// Declared total length disagrees with the actual byte count.
    LengthMismatch,
    /// An embedded structure ends past its parent.
    StructureTruncated,
    /// A structure/code octet outside the expected family.
    UnknownCode,
}

/// Peer misbehavior on an established channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolErrorKind {
    /// A service type that cannot occur in the current state.
    UnexpectedServiceType,
    /// Frame carries a channel id other than ours.
    WrongChannel,
    /// Sequence number outside the accept window.
    SequenceOutOfWindow,
    /// Peer answered with a non-zero status code.
    NegativeStatus(u8),
}

/// Elapsed deadlines; these drive retransmission and state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimeoutErrorKind {
    Connect,
    Ack,
    Heartbeat,
    Disconnect,
    Search,
}

/// Socket-level faults reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketErrorKind {
    BindFailed,
    SendFailed,
    Closed,
}

/// Secure-session faults. Terminate the affected session only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityErrorKind {
    /// Computed MAC disagrees with the received one.
    MacMismatch,
    /// Wrapper sequence not strictly greater than the last accepted.
    ReplayDetected,
    /// Server rejected SESSION_AUTHENTICATE.
    AuthenticationFailed,
    /// Built without the `secure` feature (or backend failure).
    CryptoUnavailable,
    /// Frame arrived for a session that is already closed.
    SessionClosed,
}

/// Unrecoverable conditions; the endpoint is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatalErrorKind {
    /// A bounded buffer or table overflowed.
    OutOfResource,
    /// Internal invariant broken; state can no longer be trusted.
    InvariantViolated,
}

// =============================================================================
// Main Error Type
// =============================================================================

/// The error type returned by all stack operations.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KnxError {
    /// Local decode failure; the frame was dropped.
    Parse(ParseError),
    /// Peer violated the protocol on an established channel.
    Protocol(ProtocolError),
    /// A deadline elapsed.
    Timeout(TimeoutError),
    /// The transport reported a socket fault.
    Socket(SocketError),
    /// A secure-session fault; the session is terminated.
    Security(SecurityError),
    /// Unrecoverable; the endpoint is closed.
    Fatal(FatalError),
    /// Operation requires a state the endpoint is not in.
    InvalidState,
}

macro_rules! error_struct {
    ($(#[$doc:meta])* $name:ident, $kind:ty) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            kind: $kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace,
        }

        #[cfg(feature = "defmt")]
        impl defmt::Format for $name {
            fn format(&self, fmt: defmt::Formatter) {
                defmt::write!(fmt, "{}", self.kind);
            }
        }

        impl $name {
            pub(crate) fn new(kind: $kind) -> Self {
                Self {
                    kind,
                    #[cfg(feature = "std")]
                    backtrace: Backtrace::capture(),
                }
            }

            /// The concrete failure within this family.
            pub fn kind(&self) -> $kind {
                self.kind
            }

            /// Backtrace captured at construction (std builds only).
            #[cfg(feature = "std")]
            pub fn backtrace(&self) -> &Backtrace {
                &self.backtrace
            }
        }
    };
}

error_struct!(
    /// Decode failure details.
    ParseError, ParseErrorKind
);
error_struct!(
    /// Protocol violation details.
    ProtocolError, ProtocolErrorKind
);
error_struct!(
    /// Timeout details.
    TimeoutError, TimeoutErrorKind
);
error_struct!(
    /// Socket fault details.
    SocketError, SocketErrorKind
);
error_struct!(
    /// Security fault details.
    SecurityError, SecurityErrorKind
);
error_struct!(
    /// Fatal condition details.
    FatalError, FatalErrorKind
);

// =============================================================================
// Convenience Constructors
// =============================================================================

impl KnxError {
    // Parse
    pub(crate) fn wrong_header() -> Self {
        Self::Parse(ParseError::new(ParseErrorKind::WrongHeader))
    }

    pub(crate) fn unknown_service_type() -> Self {
        Self::Parse(ParseError::new(ParseErrorKind::UnknownServiceType))
    }

    pub(crate) fn length_mismatch() -> Self {
        Self::Parse(ParseError::new(ParseErrorKind::LengthMismatch))
    }

    pub(crate) fn structure_truncated() -> Self {
        Self::Parse(ParseError::new(ParseErrorKind::StructureTruncated))
    }

    pub(crate) fn unknown_code() -> Self {
        Self::Parse(ParseError::new(ParseErrorKind::UnknownCode))
    }

    // Protocol
    pub(crate) fn unexpected_service_type() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnexpectedServiceType))
    }

    pub(crate) fn wrong_channel() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::WrongChannel))
    }

    pub(crate) fn sequence_out_of_window() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::SequenceOutOfWindow))
    }

    pub(crate) fn negative_status(code: u8) -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::NegativeStatus(code)))
    }

    // Timeouts
    pub(crate) fn connect_timeout() -> Self {
        Self::Timeout(TimeoutError::new(TimeoutErrorKind::Connect))
    }

    pub(crate) fn ack_timeout() -> Self {
        Self::Timeout(TimeoutError::new(TimeoutErrorKind::Ack))
    }

    pub(crate) fn heartbeat_timeout() -> Self {
        Self::Timeout(TimeoutError::new(TimeoutErrorKind::Heartbeat))
    }

    pub(crate) fn disconnect_timeout() -> Self {
        Self::Timeout(TimeoutError::new(TimeoutErrorKind::Disconnect))
    }

    #[allow(dead_code)] // discovery treats an elapsed window as success
    pub(crate) fn search_timeout() -> Self {
        Self::Timeout(TimeoutError::new(TimeoutErrorKind::Search))
    }

    // Socket
    #[allow(dead_code)] // constructed by the embassy adapters
    pub(crate) fn bind_failed() -> Self {
        Self::Socket(SocketError::new(SocketErrorKind::BindFailed))
    }

    pub(crate) fn send_failed() -> Self {
        Self::Socket(SocketError::new(SocketErrorKind::SendFailed))
    }

    pub(crate) fn socket_closed() -> Self {
        Self::Socket(SocketError::new(SocketErrorKind::Closed))
    }

    // Security
    pub(crate) fn mac_mismatch() -> Self {
        Self::Security(SecurityError::new(SecurityErrorKind::MacMismatch))
    }

    pub(crate) fn replay_detected() -> Self {
        Self::Security(SecurityError::new(SecurityErrorKind::ReplayDetected))
    }

    pub(crate) fn authentication_failed() -> Self {
        Self::Security(SecurityError::new(SecurityErrorKind::AuthenticationFailed))
    }

    pub(crate) fn crypto_unavailable() -> Self {
        Self::Security(SecurityError::new(SecurityErrorKind::CryptoUnavailable))
    }

    pub(crate) fn session_closed() -> Self {
        Self::Security(SecurityError::new(SecurityErrorKind::SessionClosed))
    }

    // Fatal
    pub(crate) fn out_of_resource() -> Self {
        Self::Fatal(FatalError::new(FatalErrorKind::OutOfResource))
    }

    pub(crate) fn invariant_violated() -> Self {
        Self::Fatal(FatalError::new(FatalErrorKind::InvariantViolated))
    }

    /// Whether this error is a parse failure (the frame was simply dropped).
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// Whether this error is a timeout of any kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether this error terminates a secure session.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

// =============================================================================
// Display
// =============================================================================

impl fmt::Display for KnxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnxError::Parse(e) => write!(f, "parse error: {:?}", e.kind),
            KnxError::Protocol(e) => write!(f, "protocol error: {:?}", e.kind),
            KnxError::Timeout(e) => write!(f, "timeout: {:?}", e.kind),
            KnxError::Socket(e) => write!(f, "socket error: {:?}", e.kind),
            KnxError::Security(e) => write!(f, "security error: {:?}", e.kind),
            KnxError::Fatal(e) => write!(f, "fatal: {:?}", e.kind),
            KnxError::InvalidState => write!(f, "invalid state"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KnxError {}
