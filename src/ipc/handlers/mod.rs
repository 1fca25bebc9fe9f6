pub mod core;
pub mod courses;
pub mod grades;
pub mod planner;
pub mod sessions;
pub mod setup;
