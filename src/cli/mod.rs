// CLI module - command-line surface of the reporter

pub mod args;

pub use args::{Cli, Commands, FetchResultArgs, IngestArgs, RunStatusArgs};
