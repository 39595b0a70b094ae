use std::{fmt, result};

/// Short form to compose Error values.
///
/// Here are few possible ways:
///
/// ```ignore
/// err!(InsufficientBytes, desc: "for payload {}", len);
/// ```
///
/// ```ignore
/// err!(IOError, try: fs::read(loc), "reading {:?}", loc);
/// ```
///
/// ```ignore
/// err!(IOError, cause: err, "from addr:{}", ip_addr);
/// ```
#[macro_export]
macro_rules! err {
    ($v:ident, try: $res:expr, $($args:expr),+) => {{
        match $res {
            Ok(val) => Ok(val),
            Err(err) => {
                let e = Error {
                    kind: ErrorKind::$v,
                    description: format!($($args),+),
                    cause: Some(Box::new(err)),
                };
                log_error!(e);
                Err(e)
            }
        }
    }};
    ($v:ident, try: $res:expr) => {{
        match $res {
            Ok(val) => Ok(val),
            Err(err) => {
                let e = Error {
                    kind: ErrorKind::$v,
                    description: err.to_string(),
                    cause: Some(Box::new(err)),
                };
                log_error!(e);
                Err(e)
            }
        }
    }};
    ($v:ident, cause: $cause:expr, $($args:expr),+) => {{
        let kind = ErrorKind::$v;
        let description = format!($($args),+);
        let e = Error { kind, description, cause: Some(Box::new($cause)) };

        log_error!(e);
        Err(e)
    }};
    ($v:ident, desc: $($args:expr),+) => {{
        let kind = ErrorKind::$v;
        let description = format!($($args),+);
        let e = Error { kind, description, cause: None };

        log_error!(e);
        Err(e)
    }};
}

// Connection loss is routine for streaming sessions, keep it out of error logs.
macro_rules! log_error {
    ($e:ident) => {{
        use log::{debug, error};

        match $e.kind {
            ErrorKind::Disconnected => debug!("{}: {}", $e.kind, $e.description),
            _ => {
                error!("{}: {}", $e.kind, $e.description);
                match &$e.cause {
                    Some(cause) => error!("cause:{}", cause.to_string()),
                    None => (),
                }
            }
        }
    }};
}

/// Error that is part of [Result] type.
pub struct Error {
    pub(crate) kind: ErrorKind,
    pub(crate) description: String,
    pub(crate) cause: Option<Box<dyn std::error::Error + Send>>,
}

impl Default for Error {
    fn default() -> Error {
        Error {
            kind: ErrorKind::InvalidInput,
            description: String::default(),
            cause: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}:{}", self.kind, self.description)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "<{},{}>", self.kind, self.description)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(val: std::num::TryFromIntError) -> Self {
        let err: result::Result<(), Error> = err!(TryFromIntError, cause: val, "{}", val);
        err.unwrap_err()
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(val: std::num::ParseIntError) -> Self {
        let err: result::Result<(), Error> = err!(InvalidInput, cause: val, "{}", val);
        err.unwrap_err()
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(val: std::net::AddrParseError) -> Self {
        let err: result::Result<(), Error> = err!(InvalidAddress, cause: val, "{}", val);
        err.unwrap_err()
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(val: std::convert::Infallible) -> Self {
        match val {}
    }
}

impl From<std::io::Error> for Error {
    fn from(val: std::io::Error) -> Self {
        let err: result::Result<(), Error> = err!(IOError, cause: val, "{}", val);
        err.unwrap_err()
    }
}

impl Error {
    /// Return the error kind, caller should know how to handle it.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Return error kinds from this error and all of the root causes.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        let mut kinds = vec![self.kind];
        let cause = self.cause.as_ref().and_then(|e| e.downcast_ref::<Error>());
        if let Some(err) = cause {
            kinds.extend_from_slice(&err.kinds());
        }
        kinds
    }

    /// Return whether `kind` is this error's kind or the kind of one of its causes.
    pub fn has(&self, kind: ErrorKind) -> bool {
        self.kinds().into_iter().any(|k| k == kind)
    }
}

/// Error kind expected to be handled by calling functions.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    // general error
    InvalidInput,
    InvalidAddress,
    // framing errors
    InsufficientBytes,
    MalformedFrame,
    ProtocolError,
    // network error
    Disconnected,
    // topic errors
    TopicNotFound,
    TopicExists,
    PostNotFound,
    PostExists,
    Persistence,
    // thread / ipc error
    IPCFail,
    // chain of error
    TryFromIntError,
    IOError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use ErrorKind::*;

        match self {
            // general error
            InvalidInput => write!(f, "InvalidInput"),
            InvalidAddress => write!(f, "InvalidAddress"),
            // framing errors
            InsufficientBytes => write!(f, "InsufficientBytes"),
            MalformedFrame => write!(f, "MalformedFrame"),
            ProtocolError => write!(f, "ProtocolError"),
            // network error
            Disconnected => write!(f, "Disconnected"),
            // topic errors
            TopicNotFound => write!(f, "TopicNotFound"),
            TopicExists => write!(f, "TopicExists"),
            PostNotFound => write!(f, "PostNotFound"),
            PostExists => write!(f, "PostExists"),
            Persistence => write!(f, "Persistence"),
            // thread / ipc error
            IPCFail => write!(f, "IPCFail"),
            // chain of error
            TryFromIntError => write!(f, "TryFromIntError"),
            IOError => write!(f, "IOError"),
        }
    }
}
