use bmart_derive::EnumStr;
use thiserror::Error;

pub type EResult<T> = Result<T, Error>;

/// Exit status for configuration errors detected before the loop starts
pub const EXIT_CONFIG: i32 = 2;
/// Exit status for any other fatal start-up failure
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("playback error: {0}")]
    Playback(String),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, EnumStr)]
#[enumstr(rename_all = "lowercase")]
pub enum ErrorKind {
    Configuration,
    Connection,
    Protocol,
    Playback,
}

impl Error {
    pub fn configuration(msg: impl std::fmt::Display) -> Self {
        Self::Configuration(msg.to_string())
    }
    pub fn connection(msg: impl std::fmt::Display) -> Self {
        Self::Connection(msg.to_string())
    }
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }
    pub fn playback(msg: impl std::fmt::Display) -> Self {
        Self::Playback(msg.to_string())
    }
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Connection(_) => ErrorKind::Connection,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Playback(_) => ErrorKind::Playback,
        }
    }
    /// Configuration errors stop the process, everything else is logged and
    /// retried on the next cycle
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        self.kind() != ErrorKind::Configuration
    }
    pub fn exit_code(&self) -> i32 {
        if self.kind() == ErrorKind::Configuration {
            EXIT_CONFIG
        } else {
            EXIT_FAILURE
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Connection(e.to_string())
    }
}

impl From<rmodbus::ErrorKind> for Error {
    fn from(e: rmodbus::ErrorKind) -> Self {
        Error::Protocol(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Configuration(e.to_string())
    }
}

impl From<tera::Error> for Error {
    fn from(e: tera::Error) -> Self {
        // tera keeps the useful part in the source chain
        let mut msg = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(s) = source {
            msg = format!("{msg}: {s}");
            source = s.source();
        }
        Error::Configuration(msg)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Error::Configuration(e.to_string())
    }
}

#[cfg(feature = "gpio")]
impl From<rppal::gpio::Error> for Error {
    fn from(e: rppal::gpio::Error) -> Self {
        Error::Connection(format!("gpio: {e}"))
    }
}
