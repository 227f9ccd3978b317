//! Defines the message types that are sent between the coordinator and historical servers.

use crate::{server::ImmutableServer, CommandResult, DataSegment, SegmentAction};
use uuid::Uuid;

/// The message type that coordinator and historicals send over TCP.
///
/// Messages are framed with [`send_tcp_message`][crate::nodes::send_tcp_message] and
/// [`receive_tcp_message`][crate::nodes::receive_tcp_message].
#[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TcpMessage {
    /// Asks a historical for a snapshot of the segments it holds.
    ///
    /// The historical responds with an `InventoryResponse` message.
    InventoryRequest,
    /// Reply to an `InventoryRequest` message.
    InventoryResponse(ImmutableServer),
    /// A [`SegmentCommand`] message.
    SegmentCommand(SegmentCommand),
    /// A [`CommandResponse`] message.
    CommandResponse(CommandResponse),
}

/// Asks a historical to load or drop a segment.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SegmentCommand {
    /// Copied into the [`CommandResponse`] to match it with the command.
    pub request_id: Uuid,
    /// Whether the segment should be loaded or dropped.
    pub action: SegmentAction,
    /// The affected segment.
    pub segment: DataSegment,
}

impl SegmentCommand {
    /// Creates a new command with a random request ID.
    pub fn new(action: SegmentAction, segment: DataSegment) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            action,
            segment,
        }
    }
}

/// Reply of a historical to a [`SegmentCommand`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CommandResponse {
    /// The `request_id` of the command that this response belongs to.
    pub request_id: Uuid,
    /// Whether the command was executed.
    pub result: CommandResult,
}
