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
/// The variants are grouped by the failure class they belong to. Only
/// [`Error::RecorderUnreachable`] is ever allowed to stop the instrumentation facility; every
/// other error degrades to "leave this unit unchanged" or "drop this hit".
///
/// # Error Categories
///
/// ## Parse failures
/// - [`Error::Malformed`] - Corrupted or invalid class file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the buffer
/// - [`Error::UnsupportedVersion`] - Class file version newer than this crate understands
/// - [`Error::Empty`] - Empty input provided
///
/// ## Rewrite failures
/// - [`Error::BranchOutOfRange`] - A relocated 16-bit branch offset no longer fits
/// - [`Error::CodeTooLarge`] - A rewritten method exceeds the 65535 byte code limit
/// - [`Error::ConstantPoolOverflow`] - No room left in the constant pool for the probe constants
/// - [`Error::StackAnalysis`] - The operand stack depth could not be recomputed
///
/// ## Runtime failures
/// - [`Error::RecorderUnreachable`] - The hit recorder could not be installed (fatal)
/// - [`Error::Sink`] - A hit could not be persisted
/// - [`Error::Config`] - Agent options could not be understood
///
/// # Examples
///
/// ```rust
/// use lineprobe::{Error, classfile::ClassFile};
///
/// match ClassFile::parse(&[0xCA, 0xFE]) {
///     Ok(_) => unreachable!(),
///     Err(Error::OutOfBounds) => println!("truncated class file"),
///     Err(e) => println!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Parse failures
    /// The class file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
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

    /// The class file declares a major version this crate does not know how to rewrite.
    #[error("Unsupported class file version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version found in the header
        major: u16,
        /// Minor version found in the header
        minor: u16,
    },

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    // Rewrite failures
    /// A branch whose offset is encoded in 16 bits can no longer reach its target after
    /// probes were inserted.
    ///
    /// The associated values are the new offset of the branching instruction and the
    /// relative offset that did not fit.
    #[error("Branch at {at} needs offset {offset}, which does not fit in 16 bits")]
    BranchOutOfRange {
        /// New bytecode offset of the branch instruction
        at: usize,
        /// Relative offset that would have to be encoded
        offset: i64,
    },

    /// The rewritten method body exceeds the JVM limit of 65535 bytes of code.
    #[error("Rewritten code of {0} bytes exceeds the 65535 byte limit")]
    CodeTooLarge(usize),

    /// The constant pool has no free slots left for the probe constants.
    #[error("Constant pool overflow - {0} slots required")]
    ConstantPoolOverflow(usize),

    /// The maximum operand stack depth could not be recomputed.
    #[error("Stack analysis failed - {0}")]
    StackAnalysis(String),

    // Runtime failures
    /// The hit recorder could not be installed into the host process.
    ///
    /// Without a reachable recorder every inserted probe would fail at run time, so this
    /// error must abort the agent before any application code runs.
    #[error("Hit recorder is unreachable - {0}")]
    RecorderUnreachable(String),

    /// A sink could not persist a hit.
    #[error("Sink write failed - {0}")]
    Sink(#[from] std::io::Error),

    /// The agent options could not be understood.
    #[error("Invalid agent option - {0}")]
    Config(String),
}

impl Error {
    /// Returns `true` for errors produced while reading a class file.
    #[must_use]
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            Error::Malformed { .. }
                | Error::OutOfBounds
                | Error::UnsupportedVersion { .. }
                | Error::Empty
        )
    }
}
