//! Offline sync queue: models, retry policy, queue store, dispatcher and
//! scheduler, plus the transport and server-side merge contracts.

mod clock;
mod dispatcher;
mod emojis;
mod merge;
mod queue_store;
mod retry_policy;
mod scheduler;
mod sync_model;
mod transport;

pub use clock::*;
pub use dispatcher::*;
pub use emojis::*;
pub use merge::*;
pub use queue_store::*;
pub use retry_policy::*;
pub use scheduler::*;
pub use sync_model::*;
pub use transport::*;
