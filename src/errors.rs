use std::fmt;

/// Failure classification for a finished (or unlaunchable) encoder process.
///
/// Non-zero exits are classified by inspecting the diagnostic output for known
/// substrings; the first matching category wins, in this declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessFailure {
    /// The encoder binary could not be launched at all.
    Spawn,
    /// "No space left on device"
    StorageExhausted,
    /// "Invalid argument"
    InvalidArgument,
    /// Filter graph rejected at configuration time.
    FilterGraph,
    /// CUDA / driver level failure.
    Hardware,
    /// Operation unsupported by the installed encoder build.
    Unimplemented,
    /// Non-zero exit with no recognized diagnostic.
    NonZeroExit(Option<i32>),
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn => write!(f, "failed to spawn encoder process"),
            Self::StorageExhausted => write!(f, "device storage exhausted"),
            Self::InvalidArgument => write!(f, "invalid encoder argument"),
            Self::FilterGraph => write!(f, "filter graph configuration rejected"),
            Self::Hardware => write!(f, "hardware/driver error"),
            Self::Unimplemented => write!(f, "operation not implemented by encoder"),
            Self::NonZeroExit(Some(code)) => write!(f, "encoder exited with code {code}"),
            Self::NonZeroExit(None) => write!(f, "encoder terminated by signal"),
        }
    }
}

impl ProcessFailure {
    /// Classify a non-zero exit from the encoder's diagnostic output.
    /// Priority order is fixed; the first matching substring wins.
    pub fn classify(stderr: &str, exit_code: Option<i32>) -> Self {
        const RULES: &[(&[&str], ProcessFailure)] = &[
            (&["No space left on device"], ProcessFailure::StorageExhausted),
            (&["Invalid argument"], ProcessFailure::InvalidArgument),
            (
                &["Error opening filters", "Error initializing complex filters"],
                ProcessFailure::FilterGraph,
            ),
            (&["CUDA error", "CUDA failure"], ProcessFailure::Hardware),
            (
                &[
                    "Function not implemented",
                    "Impossible to convert between the formats",
                ],
                ProcessFailure::Unimplemented,
            ),
        ];

        for (needles, failure) in RULES {
            if needles.iter().any(|needle| stderr.contains(needle)) {
                return failure.clone();
            }
        }
        Self::NonZeroExit(exit_code)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// Malformed render request (bad dimensions, unreadable source bitmap, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// The hardware path was requested but capability probing ruled it out.
    /// Recoverable: the caller is expected to switch render method entirely.
    #[error("capability error: {0}")]
    Capability(String),

    /// Filter-graph input/index mismatch. Internal contract violation; fatal.
    #[error("filter graph build error: {0}")]
    Build(String),

    /// Encoder process failure. `detail` carries the raw diagnostic tail so
    /// the caller can decide on a fallback.
    #[error("encoder process failed: {kind}: {detail}")]
    Process { kind: ProcessFailure, detail: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RenderError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }

    pub fn build(msg: impl Into<String>) -> Self {
        Self::Build(msg.into())
    }

    pub fn process(kind: ProcessFailure, detail: impl Into<String>) -> Self {
        Self::Process {
            kind,
            detail: detail.into(),
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
