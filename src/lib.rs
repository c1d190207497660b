//! Headless core of a one-on-one chat client: session handling, REST calls,
//! a socket connection with typed subscriptions, and the stores that merge
//! optimistic sends, fetched history and pushed messages per peer.

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod directory;
pub mod error;
pub mod messages;
pub mod models;
pub mod presence;
pub mod session;
pub mod token_store;

pub use client::ChatClient;
pub use config::ClientConfig;
pub use error::ClientError;
