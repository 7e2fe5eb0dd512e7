pub mod access;
pub mod identifiers;
pub mod notifications;
