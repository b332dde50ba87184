//! Error surface.
//!
//! Model-load and training errors propagate to the caller of `set_model`
//! through a normal `Result`. Everything on the streaming path
//! (`put_attitude`/`put_acceleration`/`put_beacons`) is non-fatal by design:
//! the engine never returns `Err` from those calls. Instead it drops the
//! offending sample and hands a [`Diagnostic`] to the log sink, matching the
//! "runtime never aborts" rule.

use thiserror::Error;

/// Errors that can surface from [`crate::frontend::Engine::set_model`].
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model bundle load failed: {0}")]
    Load(#[from] ModelLoadError),

    #[error("observation model training failed: {0}")]
    Train(#[from] ModelTrainError),
}

/// Malformed or incomplete model bundle.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("malformed model document: {0}")]
    MalformedDocument(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid base64 payload for `{0}`")]
    BadBase64(&'static str),

    #[error("raster decode failed for floor {floor}: {reason}")]
    DecoderFailure { floor: i32, reason: String },

    #[error("bundle declares no floors")]
    EmptyBuilding,

    #[error("bundle declares no known beacons")]
    EmptyBeaconTable,
}

/// The observation-model trainer did not converge.
#[derive(Debug, Error)]
pub enum ModelTrainError {
    #[error("LDPL/GP fit did not converge within {max_iteration} iterations (final tolerance {tolerance:e})")]
    DidNotConverge { max_iteration: usize, tolerance: f64 },

    #[error("no training samples were provided")]
    NoSamples,
}

/// Non-fatal streaming-path events, reported to the log sink instead of
/// returned as `Err`. `Display` renders a one-line human-readable message
/// suitable for `log::warn!`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Diagnostic {
    #[error("put* called before set_model completed")]
    NotReady,

    #[error("timestamp went backward: incoming {incoming} < last processed {last}")]
    InvalidInput { incoming: i64, last: i64 },

    #[error("sample contained NaN/infinite value in field `{field}`")]
    NonFiniteSample { field: &'static str },

    #[error("scan had no strong beacon after filtering; update skipped")]
    EmptyScan,

    #[error("floor transition corroboration requested but no altimeter reading available")]
    MissingAltimeterCorroboration,

    #[error("effective sample size below hard floor for {consecutive} consecutive updates; reverting to UNKNOWN")]
    FilterCollapsed { consecutive: u32 },
}
