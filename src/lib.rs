pub mod core;
pub mod services;
pub mod utils;

pub use crate::core::config::Config;
pub use crate::core::error::{PipelineError, PipelineResult};
pub use crate::services::workflow::{RunReport, StoryPipeline};
