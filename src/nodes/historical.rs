//! A historical server that holds segments in memory and executes load and drop commands.

use super::{receive_tcp_message, send_tcp_message};
use crate::{
    config::{Config, ServerConfig},
    messages::{CommandResponse, SegmentCommand, TcpMessage},
    metadata::read_segments,
    server::ImmutableServer,
    CommandFailure, CommandResult, SegmentAction,
};
use eyre::{eyre, Context};
use futures::{
    future::{self, FutureExt},
    select, StreamExt,
};
use smol::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};

/// Starts the historical node with the given name from the given config.
///
/// Runs until the process is killed.
pub fn run(config: &Config, server_name: &str) -> eyre::Result<()> {
    let server_config = config
        .server(server_name)
        .ok_or_else(|| eyre!("no server named `{}` in config", server_name))?;

    smol::block_on(async {
        let node = Arc::new(HistoricalNode::from_config(server_config).await?);
        let listener = TcpListener::bind(server_config.address)
            .await
            .with_context(|| format!("failed to listen on {}", server_config.address))?;
        log::info!(
            "Historical {} of tier {} listening on {}",
            server_config.name,
            server_config.tier,
            server_config.address
        );
        node.serve(listener, future::pending()).await
    })
}

/// The state of a historical server.
#[derive(Debug)]
pub struct HistoricalNode {
    server: Mutex<ImmutableServer>,
}

impl HistoricalNode {
    /// Creates a node that serves the given segment inventory.
    pub fn new(server: ImmutableServer) -> Self {
        Self {
            server: Mutex::new(server),
        }
    }

    /// Creates a node from its config, loading the segments listed in its segment cache file.
    pub async fn from_config(config: &ServerConfig) -> eyre::Result<Self> {
        let mut server =
            ImmutableServer::new(&config.name, config.address, &config.tier, config.max_size)
                .with_server_type(config.server_type)
                .with_priority(config.priority);
        if let Some(path) = &config.segment_cache_file {
            let segments = read_segments(path)
                .await
                .context("failed to read segment cache")?;
            log::info!("Loaded {} segments from segment cache", segments.len());
            server = server.with_segments(segments);
        }
        Ok(Self::new(server))
    }

    /// A snapshot of the held segments.
    pub fn inventory(&self) -> ImmutableServer {
        self.lock().clone()
    }

    /// Loads or drops a segment.
    ///
    /// Both actions are idempotent. A load is rejected if it would exceed the maximum size of
    /// the server.
    pub fn handle_command(&self, command: &SegmentCommand) -> CommandResult {
        let mut server = self.lock();
        let segment = &command.segment;
        match command.action {
            SegmentAction::Load => {
                if server.contains_segment(segment.id()) {
                    return Ok(());
                }
                let required = server.curr_size().saturating_add(segment.size_or_zero());
                if required > server.max_size() {
                    return Err(CommandFailure::Rejected(format!(
                        "loading segment {} needs {} bytes, but server {} has a maximum size \
                        of {} bytes",
                        segment.id(),
                        required,
                        server.name(),
                        server.max_size()
                    )));
                }
                server.add_segment(segment.clone());
                log::info!("Loaded segment {}", segment.id());
            }
            SegmentAction::Drop => {
                if server.remove_segment(segment.id()).is_some() {
                    log::info!("Dropped segment {}", segment.id());
                } else {
                    log::debug!("Segment {} to drop is not present", segment.id());
                }
            }
        }
        Ok(())
    }

    /// Accepts connections on the given listener until `shutdown` resolves.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> eyre::Result<()> {
        let mut incoming = listener.incoming().fuse();
        let shutdown = shutdown.fuse();
        futures::pin_mut!(shutdown);

        loop {
            select! {
                stream = incoming.select_next_some() => {
                    if let Err(err) = self.accept(stream) {
                        log::warn!("{:?}", err);
                    }
                }
                () = shutdown => break,
                complete => break,
            }
        }

        Ok(())
    }

    /// Spawns a connection handler for an accepted stream.
    ///
    /// Accept errors are returned to the caller, which keeps listening.
    fn accept(self: &Arc<Self>, stream: std::io::Result<TcpStream>) -> eyre::Result<()> {
        let stream = stream.context("failed to accept TCP connection")?;
        stream
            .set_nodelay(true)
            .context("failed to set nodelay for tcp stream")?;
        let node = self.clone();
        smol::spawn(async move {
            if let Err(err) = node.handle_connection(stream).await {
                log::warn!("Connection failed: {:?}", err);
            }
        })
        .detach();
        Ok(())
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> eyre::Result<()> {
        while let Some(message) = receive_tcp_message(&mut stream).await? {
            let reply = match message {
                TcpMessage::InventoryRequest => TcpMessage::InventoryResponse(self.inventory()),
                TcpMessage::SegmentCommand(command) => {
                    TcpMessage::CommandResponse(CommandResponse {
                        request_id: command.request_id,
                        result: self.handle_command(&command),
                    })
                }
                other => {
                    log::warn!("Ignoring unexpected message {:?}", other);
                    continue;
                }
            };
            send_tcp_message(&reply, &mut stream).await?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ImmutableServer> {
        self.server.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_util::{addr, segment};
    use pretty_assertions::assert_eq;

    fn node() -> HistoricalNode {
        HistoricalNode::new(
            ImmutableServer::new("h1", addr(1), "hot", 100).with_segments(vec![segment(1, 60)]),
        )
    }

    #[test]
    fn load_and_drop() {
        let node = node();

        let load = SegmentCommand::new(SegmentAction::Load, segment(2, 30));
        assert_eq!(node.handle_command(&load), Ok(()));
        assert_eq!(node.handle_command(&load), Ok(()));
        assert_eq!(node.inventory().curr_size(), 90);

        let unload = SegmentCommand::new(SegmentAction::Drop, segment(1, 60));
        assert_eq!(node.handle_command(&unload), Ok(()));
        assert_eq!(node.handle_command(&unload), Ok(()));
        assert!(!node.inventory().contains_segment(segment(1, 0).id()));
        assert_eq!(node.inventory().segment_count(), 1);
    }

    #[test]
    fn loads_beyond_max_size_are_rejected() {
        let node = node();

        let load = SegmentCommand::new(SegmentAction::Load, segment(2, 50));
        assert!(matches!(
            node.handle_command(&load),
            Err(CommandFailure::Rejected(_))
        ));
        assert_eq!(node.inventory().segment_count(), 1);
    }

    #[test]
    fn huge_held_sizes_reject_loads() {
        let node = HistoricalNode::new(
            ImmutableServer::new("h1", addr(1), "hot", u64::MAX)
                .with_segments(vec![segment(1, u64::MAX)]),
        );

        let load = SegmentCommand::new(SegmentAction::Load, segment(2, 1));
        assert!(matches!(
            node.handle_command(&load),
            Err(CommandFailure::Rejected(_))
        ));
        assert_eq!(node.inventory().curr_size(), u64::MAX);
    }

    #[test]
    fn failed_accepts_keep_serving() {
        let node = Arc::new(node());
        smol::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap();

            let failure = std::io::Error::new(std::io::ErrorKind::Other, "too many open files");
            assert!(node.accept(Err(failure)).is_err());

            let (shutdown_tx, shutdown) = smol::channel::bounded::<()>(1);
            let server = smol::spawn(node.clone().serve(listener, async move {
                let _ = shutdown.recv().await;
            }));

            let mut stream = TcpStream::connect(address).await.unwrap();
            send_tcp_message(&TcpMessage::InventoryRequest, &mut stream)
                .await
                .unwrap();
            let reply = receive_tcp_message(&mut stream).await.unwrap();
            assert!(matches!(reply, Some(TcpMessage::InventoryResponse(_))));

            drop(shutdown_tx);
            server.await.unwrap();
        });
    }

    #[test]
    fn shutdown_stops_serving() {
        let node = Arc::new(node());
        smol::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            node.serve(listener, future::ready(())).await.unwrap();
        });
    }
}
