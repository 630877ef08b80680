//! Server-side storage for synced handles and templates, API-key accounts and
//! usage events.

mod model;
mod repository;

pub use model::{HandleDB, NewHandleDB, NewTemplateDB, NewUsageLogDB, TemplateDB, UsageLogDB, UserDB};
pub use repository::SyncDataRepository;
