pub mod attendance;
pub mod core;
pub mod reports;
pub mod sections;
pub mod students;
pub mod teachers;
