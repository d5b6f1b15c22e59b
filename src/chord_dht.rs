use crate::{
    action::{OneshotTask, State},
    error::Error,
    handler::DhtHandler,
    id::{Id, IdSpace, DEFAULT_BITS},
    routing::node::NodeRef,
    socket::Socket,
    SocketTrait,
};
use std::{io, net::SocketAddr, time::Duration};
use tokio::{
    net::{self, ToSocketAddrs, UdpSocket},
    sync::{mpsc, oneshot},
    task,
};

/// Interval between stabilization rounds, also used to retry an unanswered join.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// How many times a request may be forwarded before it is given up on.
pub const DEFAULT_MAX_HOPS: u32 = 64;

/// A running Chord node.
///
/// This type is cheaply cloneable where each clone refers to the same underlying node. The node
/// keeps running until [`ChordDht::shutdown`] is called or every clone is dropped.
#[derive(Clone)]
pub struct ChordDht {
    send: mpsc::UnboundedSender<OneshotTask>,
    node: NodeRef,
}

impl ChordDht {
    /// Create a new DhtBuilder.
    pub fn builder() -> DhtBuilder {
        DhtBuilder {
            bootstrap: None,
            bits: DEFAULT_BITS,
            timeout: DEFAULT_TIMEOUT,
            node_id: None,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    fn with_builder(
        builder: DhtBuilder,
        node: NodeRef,
        space: IdSpace,
        bootstrap: Option<SocketAddr>,
        socket: Socket,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handler = DhtHandler::new(
            node,
            space,
            bootstrap,
            builder.timeout,
            builder.max_hops,
            socket,
            command_rx,
        );

        log::info!("{}: Starting node", node);
        task::spawn(handler.run());

        Self {
            send: command_tx,
            node,
        }
    }

    /// Id and address this node announces to the ring.
    pub fn node(&self) -> NodeRef {
        self.node
    }

    /// Get the state of the ring state machine, can be used for debugging. Returns `None` once
    /// the node has shut down.
    pub async fn state(&self) -> Option<State> {
        let (tx, rx) = oneshot::channel();

        if self.send.send(OneshotTask::GetState(tx)).is_err() {
            None
        } else {
            rx.await.ok()
        }
    }

    /// Get the local address this node is bound to
    pub async fn local_addr(&self) -> io::Result<SocketAddr> {
        let (tx, rx) = oneshot::channel();

        fn error() -> io::Error {
            io::Error::new(io::ErrorKind::Other, "DhtHandler has shut down")
        }

        self.send
            .send(OneshotTask::GetLocalAddr(tx))
            .map_err(|_| error())?;

        rx.await.map_err(|_| error())
    }

    /// Stop the node. Its keys are not handed over to anyone.
    pub fn shutdown(&self) {
        self.send.send(OneshotTask::Shutdown).unwrap_or(())
    }
}

// ----------------------------------------------------------------------------//

/// Stores information for initializing a node.
#[derive(Debug)]
pub struct DhtBuilder {
    bootstrap: Option<String>,
    bits: u8,
    timeout: Duration,
    node_id: Option<Id>,
    max_hops: u32,
}

impl DhtBuilder {
    /// Address (`host:port`) of a node already in the ring. Without one the node starts a new
    /// ring of its own.
    pub fn set_bootstrap(mut self, addr: impl Into<String>) -> DhtBuilder {
        self.bootstrap = Some(addr.into());
        self
    }

    /// Width of the identifier ring in bits. All nodes of a ring must agree on it.
    /// Defaults to [`DEFAULT_BITS`](crate::DEFAULT_BITS).
    pub fn set_bits(mut self, bits: u8) -> DhtBuilder {
        self.bits = bits;
        self
    }

    /// Stabilization interval. Defaults to [`DEFAULT_TIMEOUT`].
    pub fn set_timeout(mut self, timeout: Duration) -> DhtBuilder {
        self.timeout = timeout;
        self
    }

    /// Set the id of this node. If not provided, the id is the hash of the socket's `ip:port`.
    ///
    /// NOTE: the id must be unique within the ring and below `2^bits`.
    pub fn set_node_id(mut self, id: Id) -> DhtBuilder {
        self.node_id = Some(id);
        self
    }

    /// Limit on how many times a single request is forwarded. Defaults to [`DEFAULT_MAX_HOPS`].
    pub fn set_max_hops(mut self, max_hops: u32) -> DhtBuilder {
        self.max_hops = max_hops;
        self
    }

    /// Start a node with the current configuration on the provided socket.
    pub async fn start<S: SocketTrait + Send + Sync + 'static>(
        self,
        socket: S,
    ) -> Result<ChordDht, Error> {
        let space = IdSpace::new(self.bits)?;
        let socket = Socket::new(socket)?;
        let addr = socket.local_addr();

        let id = match self.node_id {
            Some(id) if !space.contains_id(id) => {
                return Err(Error::IdOutOfRange {
                    id,
                    bits: space.bits(),
                })
            }
            Some(id) => id,
            None => space.hash(addr.to_string().as_bytes()),
        };

        let bootstrap = match &self.bootstrap {
            Some(bootstrap) => Some(resolve(bootstrap, addr).await?),
            None => None,
        };

        let node = NodeRef::new(id, addr);
        Ok(ChordDht::with_builder(self, node, space, bootstrap, socket))
    }

    /// Bind a UDP socket to `addr` and start a node on it.
    pub async fn bind<A: ToSocketAddrs>(self, addr: A) -> Result<ChordDht, Error> {
        let socket = UdpSocket::bind(addr).await.map_err(Error::Bind)?;
        self.start(socket).await
    }
}

/// Resolve the bootstrap address to one reachable from a socket bound to `local`.
async fn resolve(bootstrap: &str, local: SocketAddr) -> Result<SocketAddr, Error> {
    let mut addrs = net::lookup_host(bootstrap)
        .await
        .map_err(|source| Error::InvalidBootstrap {
            addr: bootstrap.to_owned(),
            source,
        })?;

    addrs
        .find(|addr| addr.is_ipv4() == local.is_ipv4())
        .ok_or_else(|| Error::UnresolvedBootstrap(bootstrap.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn local() -> SocketAddr {
        (Ipv4Addr::LOCALHOST, 4000).into()
    }

    #[tokio::test]
    async fn resolve_literal_address() {
        let addr = resolve("127.0.0.1:5000", local()).await.unwrap();
        assert_eq!(addr, (Ipv4Addr::LOCALHOST, 5000).into());
    }

    #[tokio::test]
    async fn resolve_rejects_garbage() {
        assert!(matches!(
            resolve("not an address", local()).await,
            Err(Error::InvalidBootstrap { .. })
        ));
    }

    #[tokio::test]
    async fn resolve_rejects_other_ip_version() {
        assert!(matches!(
            resolve("[::1]:5000", local()).await,
            Err(Error::UnresolvedBootstrap(_))
        ));
    }

    #[tokio::test]
    async fn start_rejects_invalid_bits() {
        let result = ChordDht::builder()
            .set_bits(0)
            .bind((Ipv4Addr::LOCALHOST, 0))
            .await;
        assert!(matches!(result, Err(Error::InvalidBits(_))));
    }

    #[tokio::test]
    async fn start_rejects_id_out_of_range() {
        let result = ChordDht::builder()
            .set_bits(4)
            .set_node_id(Id::new(16))
            .bind((Ipv4Addr::LOCALHOST, 0))
            .await;
        assert!(matches!(
            result,
            Err(Error::IdOutOfRange { bits: 4, .. })
        ));
    }

    #[tokio::test]
    async fn default_id_is_address_hash() {
        let dht = ChordDht::builder()
            .bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let addr = dht.local_addr().await.unwrap();

        assert_eq!(dht.node().addr, addr);
        assert_eq!(
            dht.node().id,
            IdSpace::default().hash(addr.to_string().as_bytes())
        );

        dht.shutdown();
    }
}
