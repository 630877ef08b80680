//! Local user settings, including the sync target.

mod settings_model;
mod settings_service;

pub use settings_model::*;
pub use settings_service::*;
