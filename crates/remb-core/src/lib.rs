mod error;

pub use error::{ErrorKind, ExitCode, RembError, RembResult};
