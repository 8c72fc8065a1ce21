pub mod memory;
pub mod postgrest;

pub use memory::InMemoryGateway;
pub use postgrest::PostgrestGateway;
