pub mod error;
pub mod spawn;
pub mod terminate;

pub use error::{SpawnError, TerminateError};
pub use spawn::{spawn_child, SpawnSpec};
