pub mod cues;
pub mod effects;
pub mod media;
pub mod script;
pub mod sfx;
pub mod tts;
pub mod workflow;
