//! Error types for the codec crate.

use thiserror::Error;

/// Errors that can occur while packaging media.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A sequence header was requested before both parameter sets were known.
    #[error("missing H.264 parameter sets (sps: {sps} bytes, pps: {pps} bytes)")]
    MissingParameterSets { sps: usize, pps: usize },

    /// The SPS is too short to carry the profile and level bytes.
    #[error("unsupported sequence parameter set: {0} bytes, need at least 4")]
    UnsupportedFormat(usize),
}
