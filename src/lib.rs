pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod emitter;
pub mod logging;
pub mod normalizer;
pub mod reducer;
pub mod report;
pub mod session;
pub mod state;
pub mod time;
pub mod utils;

pub use normalizer::Framework;
pub use reducer::Reducer;
pub use session::ReportSession;
