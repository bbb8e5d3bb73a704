pub mod chat;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod filters;
pub mod format;
pub mod lanes;
pub mod logs;
pub mod metrics;
pub mod prefilter;
pub mod results;
pub mod router;
pub mod search;
pub mod walker;

pub use config::{EngineConfig, LaneSettings, SearchConfig};
pub use errors::{SearchError, SearchResult};
pub use lanes::{ChatFlavor, Lane, LaneTuning};
pub use results::RunSummary;
pub use search::run;
