pub mod core;
pub mod grades;
pub mod scores;
pub mod setup;
pub mod terms;
