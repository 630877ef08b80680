mod providers;
mod registry;

pub use providers::initialize_context;
pub use registry::ServiceContext;
