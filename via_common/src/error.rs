//! Error handling utilities for the via compiler

use thiserror::Error;

/// The main error type shared across pipeline stages.
#[derive(Error, Debug, Clone)]
pub enum ViaError {
    #[error("lex error: {message}")]
    Lex { message: String },

    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("type error: {message}")]
    Type { message: String },

    #[error("codegen error: {message}")]
    Codegen { message: String },

    #[error("runtime error: {message}")]
    Runtime { message: String },

    #[error("i/o error: {message}")]
    Io { message: String },

    #[error("invalid bytecode image: {message}")]
    Image { message: String },
}

/// Result type alias for via compiler operations.
pub type ViaResult<T> = Result<T, ViaError>;

impl ViaError {
    pub fn lex(message: impl Into<String>) -> Self {
        Self::Lex { message: message.into() }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into() }
    }

    pub fn ty(message: impl Into<String>) -> Self {
        Self::Type { message: message.into() }
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        Self::Codegen { message: message.into() }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime { message: message.into() }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into() }
    }

    pub fn image(message: impl Into<String>) -> Self {
        Self::Image { message: message.into() }
    }
}
