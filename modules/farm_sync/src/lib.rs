// === PUBLIC CONTRACT ===
// Entity models, gateway ports and errors shared with the presentation layer
pub mod contract;

pub use contract::{error, gateway, model};

// === WIRING ===
// Builds stores, gateway and session controller from configuration
pub mod module;
pub use module::FarmSync;

// === INTERNAL MODULES ===
// Exposed for tests and for the CLI front end; only `contract` and `module`
// are meant as stable APIs.
#[doc(hidden)]
pub mod domain;
#[doc(hidden)]
pub mod infra;
