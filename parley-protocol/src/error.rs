//! Protocol error types and status codes.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised while encoding or decoding protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated input: need {needed} bytes, {available} available")]
    TruncatedInput { needed: usize, available: usize },

    #[error("unknown field id {id} in {record}")]
    UnknownField { record: &'static str, id: u8 },

    #[error("invalid entity type: {0}")]
    InvalidEntityType(u16),

    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("{record} mixes tagged and positional fields")]
    MixedFieldMode { record: &'static str },

    #[error("{record} declares field id {id} more than once")]
    DuplicateField { record: &'static str, id: u8 },

    #[error("entities nested more than {max} levels deep")]
    NestingTooDeep { max: usize },

    #[error("{record} is positional and cannot be decoded with a field limit")]
    FieldLimitUnsupported { record: &'static str },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("value does not match the declared kind of field {0}")]
    FieldTypeMismatch(&'static str),

    #[error("invalid message section kind: {0}")]
    InvalidSectionKind(u8),

    #[error("invalid boolean byte: {0:#x}")]
    InvalidBool(u8),

    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("invalid color: {0:?}")]
    InvalidColor(String),

    #[error("length {len} exceeds the wire maximum of {max}")]
    LengthOverflow { len: usize, max: usize },

    #[error("{0} packets are encode-only and cannot be decoded")]
    EncodeOnly(&'static str),

    #[error("cannot merge into {0}: entity is immutable")]
    ImmutableEntity(&'static str),

    #[error("cannot merge patch: {0}")]
    MergeMismatch(String),

    #[error("corrupt compressed stream: {0}")]
    CorruptStream(String),

    #[error("invalid frame flags: {0:#x}")]
    InvalidFlags(u8),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether this error came from a buffer ending early.
    pub fn is_truncation(&self) -> bool {
        matches!(self, ProtocolError::TruncatedInput { .. })
    }
}

/// Result codes carried by `Status` packets.
///
/// The numeric values are part of the wire contract: new codes are
/// appended, existing ones never renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum StatusCode {
    Ok = 0,
    Outdated = 1,
    InvalidConnectionState = 2,
    LoginError = 3,
    MfaRequired = 4,
    SignupError = 5,
    RateLimited = 6,
    InvalidId = 7,
    FileTooLarge = 8,
    PermissionDenied = 9,
    InvalidAccessToken = 10,
    UserNotPending = 11,
    ContactActionNotApplicable = 12,
    InvalidUsername = 13,
    InvalidInvite = 14,
    InternalError = 15,
}

impl StatusCode {
    const ALL: [StatusCode; 16] = [
        StatusCode::Ok,
        StatusCode::Outdated,
        StatusCode::InvalidConnectionState,
        StatusCode::LoginError,
        StatusCode::MfaRequired,
        StatusCode::SignupError,
        StatusCode::RateLimited,
        StatusCode::InvalidId,
        StatusCode::FileTooLarge,
        StatusCode::PermissionDenied,
        StatusCode::InvalidAccessToken,
        StatusCode::UserNotPending,
        StatusCode::ContactActionNotApplicable,
        StatusCode::InvalidUsername,
        StatusCode::InvalidInvite,
        StatusCode::InternalError,
    ];

    /// Maps a wire value to a known code.
    pub fn from_wire(value: u16) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn is_ok(&self) -> bool {
        *self == StatusCode::Ok
    }

    /// Returns whether the failed operation may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StatusCode::RateLimited | StatusCode::InternalError)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "OK",
            StatusCode::Outdated => "OUTDATED",
            StatusCode::InvalidConnectionState => "INVALID_CONNECTION_STATE",
            StatusCode::LoginError => "LOGIN_ERROR",
            StatusCode::MfaRequired => "MFA_REQUIRED",
            StatusCode::SignupError => "SIGNUP_ERROR",
            StatusCode::RateLimited => "RATE_LIMITED",
            StatusCode::InvalidId => "INVALID_ID",
            StatusCode::FileTooLarge => "FILE_TOO_LARGE",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::InvalidAccessToken => "INVALID_ACCESS_TOKEN",
            StatusCode::UserNotPending => "USER_NOT_PENDING",
            StatusCode::ContactActionNotApplicable => "CONTACT_ACTION_NOT_APPLICABLE",
            StatusCode::InvalidUsername => "INVALID_USERNAME",
            StatusCode::InvalidInvite => "INVALID_INVITE",
            StatusCode::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(name)
    }
}
