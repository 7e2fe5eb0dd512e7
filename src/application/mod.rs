pub mod error;
pub mod handlers;
pub mod notifier;
pub mod router;
pub mod services;
pub mod state;
