//! Grosh API client
//!
//! Grosh is a shared shopping list service. Its HTTP API is unofficial and
//! undocumented; every endpoint this workspace relies on is collected in
//! [`client`] so a change on the Grosh side stays contained here.
//!
//! Consumers depend on the [`GroshApi`] trait rather than the concrete
//! [`GroshClient`], which lets the shopping list component be tested against
//! an in-memory fake.

pub mod client;
mod error;
pub mod models;

pub use client::{http_client, GroshApi, GroshClient, GROSH_URL, REQUEST_TIMEOUT};
pub use error::{GroshError, GroshResult};
pub use models::{Grocery, Household, RemoteItem};
