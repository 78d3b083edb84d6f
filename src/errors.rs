use gnss_rs::sv::SV;
use thiserror::Error;

/// Every failure mode of the pipeline. SV-local kinds stay inside the
/// owning channel and surface as events; the fatal kinds map to process
/// exit codes.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("sample source exhausted after {samples_read} samples")]
    SampleSourceExhausted { samples_read: u64 },

    #[error("sample source overrun: {dropped} samples dropped")]
    SampleSourceOverrun { dropped: u64 },

    #[error("{sv}: acquisition failed")]
    AcquisitionFailed { sv: SV },

    #[error("{sv}: lost lock")]
    LockLost { sv: SV },

    #[error("{sv}: parity failure in word {word}")]
    ParityFailure { sv: SV, word: usize },

    #[error("{sv}: ephemeris IODE mismatch ({iode2} vs {iode3})")]
    EphemerisInconsistent { sv: SV, iode2: u32, iode3: u32 },

    #[error("solver geometry singular (cond={cond:.1e})")]
    GeometrySingular { cond: f64 },

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigInvalid(_) => 2,
            Error::SampleSourceExhausted { .. } => 3,
            Error::InternalInvariant(_) => 4,
            Error::Io(_) => 3,
            _ => 4,
        }
    }
}
