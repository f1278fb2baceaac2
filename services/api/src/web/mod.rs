pub mod admin;
pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod reading;
pub mod rest;
pub mod state;

// Re-export the pieces the binaries need to assemble the router.
pub use middleware::{require_admin, require_auth};
pub use rest::ApiDoc;
pub use state::AppState;
