mod clock;
mod error;
mod pipeline;

pub use clock::{LocalClock, RemoteClockTable};
pub use error::AwarenessError;
pub use pipeline::{AwarenessPipeline, AwarenessPipelineOptions};
