pub mod error;
pub mod gateway;
pub mod model;
