use thiserror::Error;

/// Failures a story run can end with.
///
/// `SfxUnavailable` is the only non-fatal variant: the effect chain logs it
/// and drops that cue from the mix instead of propagating it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("sound effect '{cue}' unavailable: {reason}")]
    SfxUnavailable { cue: String, reason: String },

    #[error("effect application failed: {0}")]
    EffectApplication(String),

    #[error("concatenation failed: {0}")]
    Concatenation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("story contains no text")]
    EmptyStory,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::SfxUnavailable { .. })
    }
}
