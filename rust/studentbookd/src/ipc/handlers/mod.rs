pub mod core;
pub mod editing;
pub mod import_export;
pub mod setup;
pub mod students;
