//! tally-engine — The attendance decision & resource-consistency engine.
//!
//! Orchestrates one recognition event end to end (probe → gallery →
//! threshold/dedup → capture + ledger + audio) on a dedicated engine
//! thread, plus the registration pipeline and administrative cascade
//! delete that feed the same gallery.

pub mod admin;
pub mod config;
pub mod engine;
pub mod process;
pub mod registration;

pub use config::{Config, ConfigError};
pub use engine::{spawn_engine, Engine, EngineError, EngineHandle};
pub use process::{CommandExtractor, CommandSynthesizer};
pub use registration::{Registration, RegistrationError, RegistrationPipeline};
