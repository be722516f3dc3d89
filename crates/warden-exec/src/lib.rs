//! Command execution engines for Warden: a blocking policy-gated executor
//! and an interactive line-streaming session.
mod executor;
mod session;

pub use executor::{CommandRequest, CommandRunner, ExecutionReport, DEFAULT_COMMAND_TIMEOUT};
pub use session::{run_streaming, CommandSession, LineObserver, SessionError, StreamSource};
