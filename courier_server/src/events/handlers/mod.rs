mod application;
mod auth;
mod documents;
mod security;

pub use application::ApplicationHandler;
pub use auth::AuthHandler;
pub use documents::DocumentHandler;
pub use security::SecurityHandler;
