pub mod admin;
pub mod checkout;
pub mod content;
pub mod middleware;
pub mod protocol;
pub mod response;
pub mod rest;
pub mod state;
pub mod sweeper;

// Re-export what the binary needs to assemble the server.
pub use rest::{build_router, ApiDoc};
pub use state::{AppState, Stores};
pub use sweeper::expiry_sweeper;
