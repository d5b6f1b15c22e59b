use crate::{
    action::HandlerError,
    error::ClientError,
    message::{nack_code, GetRequest, Message, PutRequest, MAX_DATAGRAM_SIZE},
    routing::node::NodeRef,
    socket::Socket,
    SocketTrait,
};
use std::{io, net::SocketAddr, time::Duration};
use tokio::{
    net::{ToSocketAddrs, UdpSocket},
    time::{self, Instant},
};

/// Default time to wait for an `ACK`/`NACK` before giving up on a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a node refused a request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NackReason {
    /// `put` of a key that is already stored. Values are never overwritten.
    DuplicateKey,
    /// `get` of a key the owning node does not have.
    KeyNotFound,
    /// The request was forwarded more times than the node's hop limit allows.
    HopLimitExceeded,
    /// The value is too large to ever be returned by a `get`.
    ValueTooLarge,
    /// A node on the way could not pass the request on.
    ForwardFailed,
    Unknown(u8),
}

impl From<u8> for NackReason {
    fn from(code: u8) -> Self {
        match code {
            nack_code::DUPLICATE_KEY => Self::DuplicateKey,
            nack_code::KEY_NOT_FOUND => Self::KeyNotFound,
            nack_code::HOP_LIMIT_EXCEEDED => Self::HopLimitExceeded,
            nack_code::VALUE_TOO_LARGE => Self::ValueTooLarge,
            nack_code::FORWARD_FAILED => Self::ForwardFailed,
            other => Self::Unknown(other),
        }
    }
}

/// Successful answer from the ring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply<T> {
    pub value: T,
    /// Node that answered, i.e. the owner of the key.
    pub owner: NodeRef,
    /// Number of times the request was forwarded before reaching the owner.
    pub hops: u32,
}

/// Issues `put`/`get` requests into the ring from its own socket.
///
/// Requests are single datagrams; a lost request or reply surfaces as
/// [`ClientError::Timeout`] and retrying is up to the caller.
pub struct Client {
    socket: Socket,
    timeout: Duration,
    next_transaction_id: u32,
}

impl Client {
    /// Bind a client to the given address. Use a concrete ip, replies are sent back to it.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Client> {
        let socket = UdpSocket::bind(addr).await?;
        Client::new(socket)
    }

    pub fn new<S: SocketTrait + Send + Sync + 'static>(socket: S) -> io::Result<Client> {
        Ok(Client {
            socket: Socket::new(socket)?,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            next_transaction_id: 0,
        })
    }

    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Store `value` under `key`, entering the ring at `via`.
    pub async fn put(
        &mut self,
        via: SocketAddr,
        key: &str,
        value: impl Into<Vec<u8>>,
    ) -> Result<Reply<()>, ClientError> {
        let transaction_id = self.transaction_id();
        let request = Message::Put(PutRequest {
            transaction_id,
            key: key.to_owned(),
            value: value.into(),
            from: self.socket.local_addr(),
            hops: 0,
        });

        match self.request(via, transaction_id, request).await? {
            Answer::Ack { owner, hops, .. } => Ok(Reply {
                value: (),
                owner,
                hops,
            }),
            Answer::Nack { reason, owner, .. } => Err(ClientError::Rejected { reason, owner }),
        }
    }

    /// Fetch the value stored under `key`, entering the ring at `via`. A key the owner does not
    /// have yields `value: None`.
    pub async fn get(
        &mut self,
        via: SocketAddr,
        key: &str,
    ) -> Result<Reply<Option<Vec<u8>>>, ClientError> {
        let transaction_id = self.transaction_id();
        let request = Message::Get(GetRequest {
            transaction_id,
            key: key.to_owned(),
            from: self.socket.local_addr(),
            hops: 0,
        });

        match self.request(via, transaction_id, request).await? {
            Answer::Ack { value, owner, hops } => Ok(Reply { value, owner, hops }),
            Answer::Nack {
                reason: NackReason::KeyNotFound,
                owner,
                hops,
            } => Ok(Reply {
                value: None,
                owner,
                hops,
            }),
            Answer::Nack { reason, owner, .. } => Err(ClientError::Rejected { reason, owner }),
        }
    }

    fn transaction_id(&mut self) -> u32 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    async fn request(
        &mut self,
        via: SocketAddr,
        transaction_id: u32,
        request: Message,
    ) -> Result<Answer, ClientError> {
        // Every forward may widen the hop counter, make sure the request still fits then.
        let size = request.max_encoded_len().map_err(ClientError::Encode)?;
        if size > MAX_DATAGRAM_SIZE {
            return Err(ClientError::MessageTooLarge(size));
        }

        self.socket.send(&request, via).await.map_err(|error| match error {
            HandlerError::Encode(error) => ClientError::Encode(error),
            HandlerError::MessageTooLarge(size) => ClientError::MessageTooLarge(size),
            HandlerError::SocketError(error) => ClientError::Socket(error),
        })?;

        let deadline = Instant::now() + self.timeout;

        loop {
            let (message, addr) = match time::timeout_at(deadline, self.socket.recv()).await {
                Ok(result) => result?,
                Err(_) => return Err(ClientError::Timeout(self.timeout)),
            };

            match message {
                Message::Ack(ack) if ack.transaction_id == transaction_id => {
                    return Ok(Answer::Ack {
                        value: ack.value,
                        owner: ack.owner,
                        hops: ack.hops,
                    })
                }
                Message::Nack(nack) if nack.transaction_id == transaction_id => {
                    return Ok(Answer::Nack {
                        reason: nack.code.into(),
                        owner: nack.owner,
                        hops: nack.hops,
                    })
                }
                other => log::debug!("Ignoring unrelated message from {addr:?}: {other:?}"),
            }
        }
    }
}

enum Answer {
    Ack {
        value: Option<Vec<u8>>,
        owner: NodeRef,
        hops: u32,
    },
    Nack {
        reason: NackReason,
        owner: NodeRef,
        hops: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{id::Id, message::Ack};
    use std::net::Ipv4Addr;

    #[test]
    fn nack_reason_from_code() {
        assert_eq!(NackReason::from(nack_code::DUPLICATE_KEY), NackReason::DuplicateKey);
        assert_eq!(NackReason::from(nack_code::KEY_NOT_FOUND), NackReason::KeyNotFound);
        assert_eq!(
            NackReason::from(nack_code::HOP_LIMIT_EXCEEDED),
            NackReason::HopLimitExceeded
        );
        assert_eq!(NackReason::from(nack_code::VALUE_TOO_LARGE), NackReason::ValueTooLarge);
        assert_eq!(NackReason::from(nack_code::FORWARD_FAILED), NackReason::ForwardFailed);
        assert_eq!(NackReason::from(200), NackReason::Unknown(200));
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_for_a_later_request() {
        let node = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let node_addr = node.local_addr().unwrap();
        let owner = NodeRef::new(Id::new(1), node_addr);

        let mut client = Client::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap()
            .set_timeout(Duration::from_millis(200));
        let client_addr = client.local_addr();

        // The node sits on the put until the client gives up.
        assert!(matches!(
            client.put(node_addr, "k", "v").await,
            Err(ClientError::Timeout(_))
        ));

        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let (size, _) = node.recv_from(&mut buffer).await.unwrap();
        let put = match Message::decode(&buffer[..size]).unwrap() {
            Message::Put(put) => put,
            other => panic!("unexpected message {:?}", other),
        };

        // Answer it late: the client reads this before the answer to its get.
        let late = Message::Ack(Ack {
            transaction_id: put.transaction_id,
            key: put.key,
            value: None,
            owner,
            hops: 0,
        });
        node.send_to(&late.encode().unwrap(), client_addr)
            .await
            .unwrap();

        let serve_get = async {
            let (size, _) = node.recv_from(&mut buffer).await.unwrap();
            let get = match Message::decode(&buffer[..size]).unwrap() {
                Message::Get(get) => get,
                other => panic!("unexpected message {:?}", other),
            };

            let reply = Message::Ack(Ack {
                transaction_id: get.transaction_id,
                key: get.key,
                value: Some(b"v".to_vec()),
                owner,
                hops: 0,
            });
            node.send_to(&reply.encode().unwrap(), client_addr)
                .await
                .unwrap();
        };

        let (reply, ()) = tokio::join!(client.get(node_addr, "k"), serve_get);
        let reply = reply.unwrap();

        assert_eq!(reply.value.as_deref(), Some(&b"v"[..]));
        assert_eq!(reply.owner, owner);
    }

    #[tokio::test]
    async fn oversized_request_is_refused_before_sending() {
        let mut client = Client::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let via = client.local_addr();

        assert!(matches!(
            client.put(via, "k", vec![0u8; MAX_DATAGRAM_SIZE]).await,
            Err(ClientError::MessageTooLarge(_))
        ));
    }
}
