//! Process launching and live output relay.
//!
//! Provides:
//! - `ProcessRunner` - prepare and launch a file from a working directory
//! - `RunHandle` - one supervised execution, cancellable at any time
//! - `relay_stream` - forward a child stream to the client as it arrives
//! - `Utf8Decoder` - decode output chunks without splitting characters
//! - Pseudo-terminal and launch shell utilities

pub mod decode;
pub mod relay;
pub mod runner;
pub mod shell;
pub mod terminal;

pub use decode::Utf8Decoder;
pub use relay::{OutputReader, relay_stream};
pub use runner::{ProcessError, ProcessRunner, RunHandle, RunnerConfig, SpawnedProcess};
pub use shell::{LaunchShell, resolve_executable_path};
pub use terminal::OutputMode;
