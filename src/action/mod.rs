use crate::routing::node::NodeRef;
use std::{fmt, io, net::SocketAddr};
use thiserror::Error;
use tokio::sync::oneshot;

/// Snapshot of a node's ring state, mostly useful for debugging and tests.
#[derive(Clone, Debug)]
pub struct State {
    pub node: NodeRef,
    pub bits: u8,
    pub joined: bool,
    /// `None` until the node has joined a ring.
    pub successor: Option<NodeRef>,
    pub predecessor: Option<NodeRef>,
    /// Finger entries in table order (entry 1 first).
    pub fingers: Vec<NodeRef>,
    pub stored_keys: usize,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Node ID: {}; DHT: {}; Successor: {:?}; Predecessor: {:?}; FingerTable: [",
            self.node.id,
            self.joined,
            self.successor.map(|n| n.id),
            self.predecessor.map(|n| n.id),
        )?;

        for (i, finger) in self.fingers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", finger.id)?;
        }

        write!(f, "]")
    }
}

/// Task that our DHT will execute immediately.
pub(crate) enum OneshotTask {
    /// Retrieve a snapshot of the ring state.
    GetState(oneshot::Sender<State>),
    /// Get the local address the socket is bound to.
    GetLocalAddr(oneshot::Sender<SocketAddr>),
    /// Stop the message loop after the current iteration.
    Shutdown,
}

#[derive(Error, Debug)]
pub(crate) enum HandlerError {
    #[error("failed to encode message")]
    Encode(#[from] serde_bencode::Error),
    #[error("message of {0} bytes exceeds the 1024 byte datagram limit")]
    MessageTooLarge(usize),
    #[error("socket error")]
    SocketError(#[from] io::Error),
}
