#![forbid(unsafe_code)]

pub mod directory;
pub mod dispatcher;
pub mod groups;
pub mod health;
pub mod hub;
pub mod identity;
pub mod outbound;
pub mod presence;
pub mod registry;
pub mod session;
pub mod state;
pub mod topics;

#[cfg(test)]
mod dispatcher_tests;
