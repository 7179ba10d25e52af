//! Error types for grid client operations.

use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Server-side error codes.
///
/// These correspond to the error codes carried in protocol error responses.
/// They let the client decide whether a failed invocation may safely be
/// repeated on another member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ServerErrorCode {
    /// Undefined server error.
    Undefined = 0,
    /// An argument the server rejected as malformed.
    IllegalArgument = 9,
    /// An operation invoked in a state the server does not allow.
    IllegalState = 11,
    /// An I/O failure on the server side.
    Io = 14,
    /// Authentication rejected by the server.
    Authentication = 21,
    /// The partition is being migrated to another owner.
    PartitionMigrating = 38,
    /// A transient server condition; the operation may be repeated.
    Retryable = 39,
    /// A transient server-side I/O condition; the operation may be repeated.
    RetryableIo = 40,
    /// The targeted member no longer owns the operation's data.
    TargetNotMember = 41,
    /// The operation did not complete within the server-side limit.
    OperationTimeout = 46,
    /// The operation may or may not have committed before the failure.
    IndeterminateOperationState = 53,
    /// The targeted member disconnected before responding.
    TargetDisconnected = 62,
    /// The targeted member left the cluster mid-operation.
    MemberLeft = 64,
}

impl ServerErrorCode {
    /// Creates a `ServerErrorCode` from its wire protocol value.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Undefined),
            9 => Some(Self::IllegalArgument),
            11 => Some(Self::IllegalState),
            14 => Some(Self::Io),
            21 => Some(Self::Authentication),
            38 => Some(Self::PartitionMigrating),
            39 => Some(Self::Retryable),
            40 => Some(Self::RetryableIo),
            41 => Some(Self::TargetNotMember),
            46 => Some(Self::OperationTimeout),
            53 => Some(Self::IndeterminateOperationState),
            62 => Some(Self::TargetDisconnected),
            64 => Some(Self::MemberLeft),
            _ => None,
        }
    }

    /// Returns the numeric wire protocol value.
    pub fn value(self) -> i32 {
        self as i32
    }

    /// Returns `true` if this error code indicates a retryable operation.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Retryable
                | Self::RetryableIo
                | Self::PartitionMigrating
                | Self::TargetNotMember
                | Self::TargetDisconnected
                | Self::MemberLeft
        )
    }
}

impl fmt::Display for ServerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "UNDEFINED"),
            Self::IllegalArgument => write!(f, "ILLEGAL_ARGUMENT"),
            Self::IllegalState => write!(f, "ILLEGAL_STATE"),
            Self::Io => write!(f, "IO"),
            Self::Authentication => write!(f, "AUTHENTICATION"),
            Self::PartitionMigrating => write!(f, "PARTITION_MIGRATING"),
            Self::Retryable => write!(f, "RETRYABLE"),
            Self::RetryableIo => write!(f, "RETRYABLE_IO"),
            Self::TargetNotMember => write!(f, "TARGET_NOT_MEMBER"),
            Self::OperationTimeout => write!(f, "OPERATION_TIMEOUT"),
            Self::IndeterminateOperationState => write!(f, "INDETERMINATE_OPERATION_STATE"),
            Self::TargetDisconnected => write!(f, "TARGET_DISCONNECTED"),
            Self::MemberLeft => write!(f, "MEMBER_LEFT"),
        }
    }
}

/// The main error type for grid client operations.
///
/// Covers client-side failures (connection, configuration, lifecycle) and
/// server-side errors decoded from protocol error responses.
#[derive(Debug, Error, Clone)]
pub enum GridError {
    /// Configuration validation failed before startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The operation requires the client to be in the `Ready` state.
    #[error("client not ready")]
    NotReady,

    /// `start` was invoked on a client that is not in the `Created` state.
    #[error("client cannot start")]
    CannotStart,

    /// An operation configured without a deadline was invoked without a
    /// cancellation token to bound it.
    #[error("missing cancellation context: {0}")]
    MissingContext(String),

    /// Connection-related errors (network failures, disconnections).
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol-related errors (malformed frames, unsupported envelopes).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The invocation deadline elapsed before a response arrived.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// The caller cancelled the invocation.
    #[error("operation cancelled")]
    Cancelled,

    /// The target member disconnected before the operation completed.
    #[error("target disconnected: {0}")]
    TargetDisconnected(String),

    /// The targeted member no longer owns the operation's data.
    #[error("target not member: {0}")]
    TargetNotMember(String),

    /// A member-targeted invocation named a uuid absent from the member list.
    #[error("no such member: {0}")]
    NoSuchMember(String),

    /// Authentication errors (invalid credentials, rejected handshake).
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Malformed user input, e.g. an illegal group name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A client-side precondition was violated.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A non-idempotent invocation failed after the request may have been
    /// executed; retrying could apply the mutation twice.
    #[error("invocation may have committed: {0}")]
    IndeterminateOperation(String),

    /// An internal invariant was broken; not recovered.
    #[error("unexpected error: {0}")]
    Unexpected(String),

    /// A server-side error decoded from a protocol error response.
    #[error("server error ({code}): {message}")]
    Server {
        /// The server error code identifying the failure class.
        code: ServerErrorCode,
        /// The error message from the server.
        message: String,
    },

    /// I/O errors from the standard library (wrapped in `Arc` for `Clone`).
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for GridError {
    fn from(err: io::Error) -> Self {
        GridError::Io(Arc::new(err))
    }
}

impl GridError {
    /// Returns `true` if this error is retryable.
    ///
    /// Retryable errors are transient failures where repeating the operation
    /// on another (or the same, reconnected) member may succeed. Timeouts are
    /// not retryable: a deadline that elapsed once has elapsed for good.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Server { code, .. } => code.is_retryable(),
            Self::Connection(_) => true,
            Self::TargetDisconnected(_) => true,
            Self::TargetNotMember(_) => true,
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Creates a `GridError::Server` from a wire-level error code and message.
    pub fn from_server(code_value: i32, message: String) -> Self {
        let code = ServerErrorCode::from_value(code_value).unwrap_or(ServerErrorCode::Undefined);
        Self::Server { code, message }
    }

    /// Returns the server error code if this is a server error.
    pub fn server_error_code(&self) -> Option<ServerErrorCode> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A specialized `Result` type for grid client operations.
pub type Result<T> = std::result::Result<T, GridError>;
