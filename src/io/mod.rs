//! I/O layer - process supervision and raw byte transport
//!
//! - **Transport**: byte pump over a pair of pipes, no knowledge of framing
//! - **Process**: server process lifecycle, stderr and staged shutdown

pub mod process;
pub mod transport;

pub use process::{
    ProcessError, ProcessExitEvent, ProcessExitHandler, ProcessState, ProcessSupervisor,
    StopOutcome,
};
pub use transport::{StdioTransport, TransportError, TransportReceiver, TransportSender};
