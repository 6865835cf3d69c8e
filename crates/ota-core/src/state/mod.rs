//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{HandleResult, HandlerContext, handle_sector_ack, handle_start_ack};
pub use machine::{RetryPolicy, TransferReport, TransferSession, TransferState};
