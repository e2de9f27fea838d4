// Utility helpers

pub mod file;
pub mod ids;

pub use file::{FileUtils, RESULT_FILE_NAME};
pub use ids::{generate_id, title_hash};
