//! Domain layer for Replyte: the local reply library, its settings, and the
//! offline sync queue that ships edits to the sync server.

pub mod errors;
pub mod library;
pub mod settings;
pub mod state_store;
pub mod sync;
pub mod templating;

pub use errors::{DatabaseError, Error, Result};
