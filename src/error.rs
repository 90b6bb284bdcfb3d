use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into three groups. Input errors ([`Error::Malformed`], [`Error::OutOfBounds`],
/// [`Error::NotSupported`]) mean the class bytes could not be processed; the host must keep the
/// original bytes in effect. Registry and configuration errors ([`Error::UnknownFamily`],
/// [`Error::UnknownVersion`], [`Error::InvalidConfig`]) signal a caller mistake. Encoding errors
/// ([`Error::UndefinedLabel`], [`Error::DuplicateLabel`], [`Error::LimitExceeded`]) mean a
/// rewritten method could not be serialized; they are never turned into a partial rewrite.
///
/// A missed anchor pattern is deliberately *not* an error: it is reported as
/// [`crate::Rewrite::Unchanged`].
///
/// # Examples
///
/// ```rust
/// use hotpatch::{ClassBinary, Error};
///
/// match ClassBinary::parse(&[0xCA, 0xFE]) {
///     Ok(_) => unreachable!(),
///     Err(Error::OutOfBounds) => {}
///     Err(Error::Malformed { message, .. }) => eprintln!("malformed: {message}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The class file is damaged and could not be parsed or re-encoded.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the class file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The input is structurally valid but uses a feature this crate cannot rewrite.
    #[error("Not supported - {0}")]
    NotSupported(String),

    /// A branch or table referenced a label that is never placed in the event stream.
    #[error("Label {0} is referenced but never placed")]
    UndefinedLabel(u32),

    /// A label was placed more than once in the event stream.
    #[error("Label {0} is placed more than once")]
    DuplicateLabel(u32),

    /// A class file limit (constant pool size, code length, ...) would be exceeded.
    #[error("Limit exceeded - {0}")]
    LimitExceeded(String),

    /// The registry does not know the requested patch family.
    #[error("Unknown patch family '{0}'")]
    UnknownFamily(String),

    /// The registry knows the family, but not the requested version.
    #[error("Unknown version {version} for patch family '{family}'")]
    UnknownVersion {
        /// The requested family
        family: String,
        /// The requested version
        version: u32,
    },

    /// The supplied patch enablement or agent configuration could not be understood.
    #[error("Invalid configuration - {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Classifies this error for the host boundary.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hotpatch::{Error, ErrorKind};
    ///
    /// assert_eq!(Error::OutOfBounds.kind(), ErrorKind::MalformedBinary);
    /// ```
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Malformed { .. } | Error::OutOfBounds => ErrorKind::MalformedBinary,
            Error::NotSupported(_)
            | Error::UndefinedLabel(_)
            | Error::DuplicateLabel(_)
            | Error::LimitExceeded(_) => ErrorKind::Unsupported,
            Error::UnknownFamily(_) | Error::UnknownVersion { .. } => ErrorKind::UnknownVersion,
            Error::InvalidConfig(_) => ErrorKind::Configuration,
        }
    }
}

/// Coarse error classification reported to the host in [`crate::RewriteResult::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// The input does not parse as a structurally valid class.
    MalformedBinary,
    /// The class is valid, but the rewritten form could not be produced.
    Unsupported,
    /// A registry lookup named a family or version that does not exist.
    UnknownVersion,
    /// The patch enablement configuration is invalid.
    Configuration,
}
