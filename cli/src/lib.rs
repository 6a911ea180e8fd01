//! Library half of the `shuttle` CLI: backend construction and subcommand
//! logic, kept separate from `main.rs`'s argument parsing so both can be
//! exercised from integration tests without spawning a process.

pub mod backend;
pub mod error;
pub mod logging;
pub mod run;

pub use backend::Backend;
pub use error::CliError;
