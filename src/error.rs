// src/error.rs
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

#[derive(Debug, Error)]
pub enum AppError {
    /// User-facing failure rendered as an apology page.
    #[error("{0}")]
    Apology(String),
    #[error("login required")]
    Unauthorized,
    #[error("balance changed, please retry")]
    Conflict,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Quote error: {0}")]
    Quote(String),
    #[error("Session error: {0}")]
    Session(#[from] jsonwebtoken::errors::Error),
    #[error("Password hashing error: {0}")]
    Password(#[from] bcrypt::BcryptError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn apology(message: impl Into<String>) -> Self {
        AppError::Apology(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Apology(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::SEE_OTHER,
            AppError::Conflict => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the user; server-side details stay in the log.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Apology(_) | AppError::Conflict => self.to_string(),
            AppError::Unauthorized => "login required".to_string(),
            _ => "internal server error".to_string(),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Quote(err.to_string())
    }
}

impl Reject for AppError {}

pub type Result<T> = std::result::Result<T, AppError>;
