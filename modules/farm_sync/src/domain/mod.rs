pub mod assignees;
pub mod error;
pub mod fields;
pub mod ids;
pub mod jobs;
pub mod session;
pub mod store;
pub mod weather;
