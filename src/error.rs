use thiserror::Error;

/// Errors raised while validating width lists and building models.
#[derive(Debug, Error)]
pub enum Error {
    #[error("width multiplier list is empty")]
    EmptyWidthList,

    #[error("invalid width multiplier {0}: must lie in (0, 1]")]
    InvalidWidthMult(f64),

    #[error("duplicate width multiplier {0}")]
    DuplicateWidthMult(f64),

    #[error("width multiplier {0} is not configured")]
    UnknownWidth(f64),

    #[error("width index {index} out of range for {len} configured widths")]
    WidthIndex { index: usize, len: usize },

    #[error("{layer}: {base} channels at width {mult} rounds down to zero")]
    ZeroChannels {
        layer: &'static str,
        base: usize,
        mult: f64,
    },

    #[error("n_share must lie in -1..=4, got {0}")]
    InvalidShare(i32),

    #[error("{0} must be positive")]
    NonPositive(&'static str),

    #[error("generator and discriminator disagree on {0}")]
    Mismatch(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
