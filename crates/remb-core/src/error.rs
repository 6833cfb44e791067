use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Usage,
    Auth,
    Token,
    Listener,
    Pull,
    Content,
    Capacity,
    Store,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Usage = 2,
    Auth = 3,
    Token = 4,
    Listener = 5,
    Pull = 6,
    Content = 7,
    Capacity = 8,
    Store = 9,
    Io = 10,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{message}")]
pub struct RembError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RembError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn token(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Token, message)
    }

    pub fn listener(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Listener, message)
    }

    pub fn pull(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Pull, message)
    }

    pub fn content(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Content, message)
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capacity, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.kind {
            ErrorKind::Usage => ExitCode::Usage,
            ErrorKind::Auth => ExitCode::Auth,
            ErrorKind::Token => ExitCode::Token,
            ErrorKind::Listener => ExitCode::Listener,
            ErrorKind::Pull => ExitCode::Pull,
            ErrorKind::Content => ExitCode::Content,
            ErrorKind::Capacity => ExitCode::Capacity,
            ErrorKind::Store => ExitCode::Store,
            ErrorKind::Io => ExitCode::Io,
        }
    }
}

impl From<std::io::Error> for RembError {
    fn from(value: std::io::Error) -> Self {
        Self::io(value.to_string())
    }
}

impl From<&str> for RembError {
    fn from(value: &str) -> Self {
        Self::usage(value)
    }
}

impl From<String> for RembError {
    fn from(value: String) -> Self {
        Self::usage(value)
    }
}

pub type RembResult<T> = Result<T, RembError>;
