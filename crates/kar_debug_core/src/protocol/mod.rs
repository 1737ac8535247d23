//! Wire formats for the node link and the debugger-client link.

pub mod client;
pub mod frame;
pub mod node;

pub use client::{local_reply, peek_command_id, ClientCommand, ClientFrame};
pub use frame::{read_client_frame, write_client_frame, MAX_CLIENT_FRAME};
pub use node::{
    is_error_reply, BreakpointRequest, NodeCommand, NodeEvent, OutboundFrame, PassthroughArgs,
    UnpauseTarget, UnsetBreakpointRequest,
};
