pub mod callback;
pub mod dispatcher;
pub mod errors;
pub mod models;
mod queue;

pub use callback::{TextCallback, TextRequest};
pub use dispatcher::{Dispatcher, DispatcherOptions, DispatcherStats, ShutdownMode, SubmitPolicy};
pub use errors::*;
pub use models::*;
