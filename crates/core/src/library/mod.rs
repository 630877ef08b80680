//! Local reply library: correspondents, templates and their sync hooks.

mod defaults;
mod library_model;
mod library_service;

pub use defaults::*;
pub use library_model::*;
pub use library_service::*;
