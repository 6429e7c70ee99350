pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use commands::{AppState, CommandError, CommandResult};
pub use config::ClientConfig;
pub use error::{ApiErrorCode, AppError, AppResult};
pub use models::gradebook::{GradeCell, GradebookSnapshot, SubmissionKey};
pub use services::grade_mutation::ViewerRole;
