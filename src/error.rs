use thiserror::Error;

/// Tracker registration errors. Rejected when the tracker is registered,
/// never silently converted into a "not found" result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("hue range is reversed: min {min} > max {max}")]
    HueRangeReversed { min: i32, max: i32 },
    #[error("hue {0} is outside the 0-180 range")]
    HueOutOfRange(i32),
    #[error("tracker {0} is already registered")]
    DuplicateTracker(u32),
}

/// Frame buffer construction errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("pixel stride {0} is unsupported (expected 3 or 4 bytes per pixel)")]
    UnsupportedStride(usize),
    #[error("buffer of {len} bytes does not match {width}x{height} at {bpp} bytes per pixel")]
    SizeMismatch {
        len: usize,
        width: u32,
        height: u32,
        bpp: usize,
    },
    #[error("payload of {len} bytes is not a whole number of {bpp}-byte pixel rows for width {width}")]
    PayloadMismatch { len: usize, width: u32, bpp: usize },
    #[error("depth resolution ratio must be positive")]
    InvalidRatio,
}

/// Camera geometry errors. A pose that fails these checks is rejected at
/// construction so a half-updated transform can never reach the projector.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    #[error("projection matrix is not invertible")]
    SingularProjection,
    #[error("camera-to-world transform is not invertible")]
    SingularTransform,
}

/// Wire-level failures in remote mode. The session closes the connection on
/// any of these; there is no partial recovery mid-frame.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("{field} is out of range: {value}")]
    CountOutOfRange { field: &'static str, value: i64 },
    #[error("{field} is invalid: {value}")]
    InvalidField { field: &'static str, value: i64 },
    #[error("frame of {0} bytes exceeds the {1}-byte limit")]
    FrameTooLarge(usize, usize),
    #[error("response carries {got} results for {expected} queries in flight")]
    ResultCountMismatch { expected: usize, got: usize },
    #[error("malformed frame payload: {0}")]
    Malformed(#[from] FrameError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("protocol failure: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("connection closed by peer")]
    Disconnected,
}
