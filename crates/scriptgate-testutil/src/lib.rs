//! Test fixtures for scriptgate.
//!
//! - [`pet_api`]: an axum pet-store REST API on an ephemeral port, with the
//!   OpenAPI document describing it.
//! - [`mock_mcp`]: an rmcp tool server connected over an in-process duplex
//!   pipe.

pub mod mock_mcp;
pub mod pet_api;

pub use mock_mcp::{MockToolServer, connect_mock_server};
pub use pet_api::{PetApi, TEST_TOKEN, pet_api_document, spawn_pet_api};
