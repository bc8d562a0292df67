use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{domain}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Auth/token errors
/// - E2xxx: Channel errors
/// - E3xxx: Message errors
/// - E4xxx: Chat request / block errors
/// - E5xxx: Moderation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    ServiceUnavailable,
    BadRequest,
    Conflict,
    RateLimited,

    // Auth (E1xxx)
    TokenExpired,
    TokenInvalid,

    // Channels (E2xxx)
    ChannelNotFound,
    NotChannelMember,
    GlobalChannelMissing,
    GroupNameRequired,
    AlreadyChannelMember,
    NotGroupChannel,
    CannotMessageSelf,

    // Messages (E3xxx)
    MessageNotFound,
    ContentRejected,
    ReplyOutsideChannel,
    NotMessageSender,

    // Chat requests / blocks (E4xxx)
    ChatRequestNotFound,
    ChatRequestPending,
    ChatRequestClosed,
    ChatRequestRequired,
    PrivateMessagesDisabled,
    UserBlocked,
    CannotBlockSelf,

    // Moderation (E5xxx)
    SenderBanned,
    BanNotFound,
    DuplicateBan,
    CannotBanSelf,
    UnbanRequestNotFound,
    UnbanRequestPending,
    UnbanRequestAlreadyReviewed,
    NotBanned,
    BannedWordExists,
    BannedWordNotFound,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::ServiceUnavailable => "E0006",
            Self::BadRequest => "E0007",
            Self::Conflict => "E0008",
            Self::RateLimited => "E0009",

            // Auth
            Self::TokenExpired => "E1001",
            Self::TokenInvalid => "E1002",

            // Channels
            Self::ChannelNotFound => "E2001",
            Self::NotChannelMember => "E2002",
            Self::GlobalChannelMissing => "E2003",
            Self::GroupNameRequired => "E2004",
            Self::AlreadyChannelMember => "E2005",
            Self::NotGroupChannel => "E2006",
            Self::CannotMessageSelf => "E2007",

            // Messages
            Self::MessageNotFound => "E3001",
            Self::ContentRejected => "E3002",
            Self::ReplyOutsideChannel => "E3003",
            Self::NotMessageSender => "E3004",

            // Chat requests / blocks
            Self::ChatRequestNotFound => "E4001",
            Self::ChatRequestPending => "E4002",
            Self::ChatRequestClosed => "E4003",
            Self::ChatRequestRequired => "E4004",
            Self::PrivateMessagesDisabled => "E4005",
            Self::UserBlocked => "E4006",
            Self::CannotBlockSelf => "E4007",

            // Moderation
            Self::SenderBanned => "E5001",
            Self::BanNotFound => "E5002",
            Self::DuplicateBan => "E5003",
            Self::CannotBanSelf => "E5004",
            Self::UnbanRequestNotFound => "E5005",
            Self::UnbanRequestPending => "E5006",
            Self::UnbanRequestAlreadyReviewed => "E5007",
            Self::NotBanned => "E5008",
            Self::BannedWordExists => "E5009",
            Self::BannedWordNotFound => "E5010",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError | Self::GlobalChannelMissing => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ValidationError | Self::BadRequest | Self::GroupNameRequired
            | Self::ContentRejected | Self::ReplyOutsideChannel | Self::NotBanned => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound | Self::ChannelNotFound | Self::MessageNotFound
            | Self::ChatRequestNotFound | Self::BanNotFound | Self::UnbanRequestNotFound
            | Self::BannedWordNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::TokenExpired | Self::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Forbidden | Self::NotChannelMember | Self::NotGroupChannel
            | Self::CannotMessageSelf | Self::NotMessageSender | Self::ChatRequestRequired
            | Self::PrivateMessagesDisabled | Self::UserBlocked | Self::CannotBlockSelf
            | Self::SenderBanned | Self::CannotBanSelf => StatusCode::FORBIDDEN,
            Self::Conflict | Self::AlreadyChannelMember | Self::ChatRequestPending
            | Self::ChatRequestClosed | Self::DuplicateBan | Self::UnbanRequestPending
            | Self::UnbanRequestAlreadyReviewed | Self::BannedWordExists => StatusCode::CONFLICT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// True when the underlying cause is a unique-constraint violation.
    /// Callers use this to turn a storage-level race loss into `Conflict`
    /// or a retry-as-lookup, per operation.
    pub fn is_unique_violation(err: &diesel::result::Error) -> bool {
        matches!(
            err,
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                if *code == ErrorCode::GlobalChannelMissing {
                    // Operator-level failure: the global channel must be provisioned at init
                    tracing::error!(message = %message, "global channel missing");
                }
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match err {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        ApiErrorResponse::new("E0003", "resource not found"),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new("E0001", "database error"),
                    ),
                }
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new("E0002", msg),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
