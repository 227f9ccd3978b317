//! The connection between a load queue and the server it manages.

use crate::{
    messages::{SegmentCommand, TcpMessage},
    nodes::{receive_tcp_message, send_tcp_message},
    server::ImmutableServer,
    CommandFailure, CommandResult,
};
use eyre::{bail, eyre, Context};
use futures::{future::BoxFuture, FutureExt};
use smol::net::TcpStream;
use std::net::SocketAddr;

/// Delivers commands to a single server and fetches its inventory.
///
/// Every call returns an independent future, so a load queue can keep several commands in
/// flight against the same server. Timeouts are applied by the caller.
pub trait SegmentServerClient: Send + Sync + 'static {
    /// Sends the given command and resolves once the server acknowledged or rejected it.
    fn execute(&self, command: SegmentCommand) -> BoxFuture<'static, CommandResult>;

    /// Requests a snapshot of the segments that the server currently holds.
    fn inventory(&self) -> BoxFuture<'static, eyre::Result<ImmutableServer>>;
}

/// Talks to a [historical node](crate::nodes::historical) over TCP.
///
/// Opens a new connection for every request.
#[derive(Debug, Clone)]
pub struct TcpServerClient {
    address: SocketAddr,
}

impl TcpServerClient {
    /// Creates a client for the server listening on the given address.
    pub fn new(address: SocketAddr) -> Self {
        Self { address }
    }

    /// The address of the server.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    async fn request(address: SocketAddr, message: TcpMessage) -> eyre::Result<TcpMessage> {
        let mut stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("failed to connect to {}", address))?;
        stream
            .set_nodelay(true)
            .context("failed to set nodelay for tcp stream")?;
        send_tcp_message(&message, &mut stream).await?;
        receive_tcp_message(&mut stream)
            .await?
            .ok_or_else(|| eyre!("connection to {} closed before a response arrived", address))
    }
}

impl SegmentServerClient for TcpServerClient {
    fn execute(&self, command: SegmentCommand) -> BoxFuture<'static, CommandResult> {
        let address = self.address;
        async move {
            let request_id = command.request_id;
            match Self::request(address, TcpMessage::SegmentCommand(command)).await {
                Ok(TcpMessage::CommandResponse(response)) if response.request_id == request_id => {
                    response.result
                }
                Ok(other) => Err(CommandFailure::Transport(format!(
                    "unexpected response `{:?}`",
                    other
                ))),
                Err(err) => Err(CommandFailure::Transport(
                    err.chain()
                        .map(|cause| cause.to_string())
                        .collect::<Vec<_>>()
                        .join(": "),
                )),
            }
        }
        .boxed()
    }

    fn inventory(&self) -> BoxFuture<'static, eyre::Result<ImmutableServer>> {
        let address = self.address;
        async move {
            match Self::request(address, TcpMessage::InventoryRequest).await? {
                TcpMessage::InventoryResponse(server) => Ok(server),
                other => bail!("unexpected inventory response `{:?}`", other),
            }
        }
        .boxed()
    }
}
