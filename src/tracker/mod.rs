pub mod lerp;
pub mod state;

pub use lerp::Lerper;
pub use state::{TrackPhase, TrackState};
