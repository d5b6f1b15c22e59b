use crate::action::{HandlerError, OneshotTask, State};
use crate::{
    id::{self, Id, IdSpace},
    message::{
        nack_code, Ack, GetRequest, JoinReply, JoinRequest, Message, Nack, Notify,
        PredecessorQuery, PutRequest, StabilizeReply, SuccessorQuery, SuccessorReply,
        MAX_DATAGRAM_SIZE,
    },
    routing::{node::NodeRef, table::FingerTable},
    socket::Socket,
    storage::KeyStore,
};
use std::{fmt, net::SocketAddr, time::Duration};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::{self, Instant},
};

/// Where a key-addressed request goes next.
enum Route {
    /// We own the key.
    Local,
    /// Hand the request to this node.
    Forward(SocketAddr),
}

/// Storage for our EventLoop to invoke actions upon.
///
/// All ring state lives here and is only touched from the single task running [`Self::run`].
pub(crate) struct DhtHandler {
    this: NodeRef,
    space: IdSpace,
    running: bool,
    joined: bool,
    bootstrap: Option<SocketAddr>,
    timeout: Duration,
    next_tick: Instant,
    max_hops: u32,
    command_rx: mpsc::UnboundedReceiver<OneshotTask>,
    socket: Socket,
    successor: NodeRef,
    predecessor: Option<NodeRef>,
    fingers: FingerTable,
    store: KeyStore,
}

impl DhtHandler {
    pub fn new(
        this: NodeRef,
        space: IdSpace,
        bootstrap: Option<SocketAddr>,
        timeout: Duration,
        max_hops: u32,
        socket: Socket,
        command_rx: mpsc::UnboundedReceiver<OneshotTask>,
    ) -> Self {
        Self {
            this,
            space,
            running: true,
            // Without a bootstrap contact we are the whole ring.
            joined: bootstrap.is_none(),
            bootstrap,
            timeout,
            next_tick: Instant::now() + timeout,
            max_hops,
            command_rx,
            socket,
            successor: this,
            predecessor: None,
            fingers: FingerTable::new(this, space),
            store: KeyStore::new(),
        }
    }

    pub async fn run(mut self) {
        if !self.joined {
            self.send_join_request().await;
        }

        while self.running {
            self.run_once().await
        }

        log::info!("{}: Message loop stopped", self.this);
    }

    async fn run_once(&mut self) {
        select! {
            command = self.command_rx.recv() => {
                if let Some(command) = command {
                    self.handle_command(command)
                } else {
                    log::info!("{}: All handles dropped, shutting down", self.this);
                    self.shutdown()
                }
            }
            _ = time::sleep_until(self.next_tick) => {
                self.next_tick = Instant::now() + self.timeout;
                self.handle_tick().await
            }
            message = self.socket.recv() => {
                match message {
                    Ok((message, addr)) => if let Err(error) = self.handle_incoming(message, addr).await {
                        log::debug!("{}: Failed to handle incoming message: {} from:{addr:?}", self.this, error);
                    }
                    Err(error) => log::error!("{}: Failed to receive incoming message: {}", self.this, error),
                }
            }
        }
    }

    fn handle_command(&mut self, task: OneshotTask) {
        match task {
            OneshotTask::GetState(tx) => tx.send(self.state()).unwrap_or(()),
            OneshotTask::GetLocalAddr(tx) => self.handle_get_local_addr(tx),
            OneshotTask::Shutdown => self.shutdown(),
        }
    }

    /// Nothing else drives the protocol forward: an unjoined node retries its join, a joined node
    /// probes its successor to start a stabilization round.
    async fn handle_tick(&mut self) {
        if !self.joined {
            self.send_join_request().await;
            return;
        }

        if self.is_sole_member() {
            // Our successor is ourselves, no need to go through the socket.
            let reply = StabilizeReply {
                predecessor: self.predecessor,
            };
            if let Err(error) = self.handle_stabilize_reply(reply).await {
                log::debug!("{}: Stabilization failed: {}", self.this, error);
            }
            return;
        }

        let query = Message::PredecessorQuery(PredecessorQuery { id: self.this.id });
        if let Err(error) = self.socket.send(&query, self.successor.addr).await {
            log::debug!("{}: Failed to probe successor: {}", self.this, error);
        }
    }

    async fn send_join_request(&mut self) {
        let bootstrap = match self.bootstrap {
            Some(bootstrap) => bootstrap,
            None => return,
        };

        log::debug!("{}: Sending join request to {bootstrap:?}", self.this);

        let request = Message::JoinRequest(JoinRequest {
            node: self.this,
            hops: 0,
        });
        if let Err(error) = self.socket.send(&request, bootstrap).await {
            log::warn!("{}: Failed to send join request: {}", self.this, error);
        }
    }

    async fn handle_incoming(
        &mut self,
        message: Message,
        addr: SocketAddr,
    ) -> Result<(), HandlerError> {
        if !self.joined {
            if let Message::JoinReply(reply) = message {
                self.handle_join_reply(reply);
            } else {
                log::trace!("{}: Not joined yet, ignoring message from {addr:?}", self.this);
            }
            return Ok(());
        }

        match message {
            Message::JoinRequest(request) => self.handle_join_request(request).await,
            Message::JoinReply(_) => {
                log::debug!("{}: Ignoring duplicate join reply from {addr:?}", self.this);
                Ok(())
            }
            Message::SuccessorQuery(query) => self.handle_successor_query(query).await,
            Message::SuccessorReply(reply) => {
                self.handle_successor_reply(reply);
                Ok(())
            }
            Message::Notify(notify) => {
                self.handle_notify(notify);
                Ok(())
            }
            Message::StabilizeReply(reply) => self.handle_stabilize_reply(reply).await,
            Message::PredecessorQuery(_) => {
                let reply = Message::StabilizeReply(StabilizeReply {
                    predecessor: self.predecessor,
                });
                self.socket.send(&reply, addr).await
            }
            Message::Put(request) => self.handle_put(request).await,
            Message::Get(request) => self.handle_get(request).await,
            Message::Ack(_) | Message::Nack(_) => {
                log::debug!("{}: Ignoring client reply from {addr:?}", self.this);
                Ok(())
            }
        }
    }

    fn handle_join_reply(&mut self, reply: JoinReply) {
        self.successor = reply.successor;
        self.fingers.fill(reply.successor);
        self.joined = true;
        self.next_tick = Instant::now() + self.timeout;

        log::info!("{}: Joined the ring. {}", self.this, self);
    }

    async fn handle_join_request(&mut self, request: JoinRequest) -> Result<(), HandlerError> {
        let node = request.node;
        log::debug!("{}: Join request from {}", self.this, node);

        if node.id == self.this.id {
            log::warn!("{}: Join request from {} with our own id", self.this, node);
            return Ok(());
        }

        if self.is_sole_member() {
            // Two node ring: each is the other's successor.
            self.set_successor(node);
            return self.reply_join(node, self.this).await;
        }

        if node.id == self.successor.id {
            // A retried join we already spliced in. The successor we handed out the first time is
            // gone, so point it at ourselves and let stabilization walk it into place.
            return self.reply_join(node, self.this).await;
        }

        if id::contains(self.this.id, self.successor.id, node.id) {
            let old_successor = self.successor;
            self.set_successor(node);
            return self.reply_join(node, old_successor).await;
        }

        if request.hops >= self.max_hops {
            log::warn!("{}: Dropping join request of {}: hop limit", self.this, node);
            return Ok(());
        }

        let forward = Message::JoinRequest(JoinRequest {
            node,
            hops: request.hops + 1,
        });
        self.socket.send(&forward, self.successor.addr).await
    }

    async fn reply_join(&self, node: NodeRef, successor: NodeRef) -> Result<(), HandlerError> {
        let reply = Message::JoinReply(JoinReply { successor });
        self.socket.send(&reply, node.addr).await
    }

    async fn handle_successor_query(&mut self, query: SuccessorQuery) -> Result<(), HandlerError> {
        let owner = if self
            .predecessor
            .map_or(true, |p| id::contains(p.id, self.this.id, query.id))
        {
            self.this
        } else if id::contains(self.this.id, self.successor.id, query.id) {
            self.successor
        } else {
            if query.hops >= self.max_hops {
                log::warn!("{}: Dropping successor query for {}: hop limit", self.this, query.id);
                return Ok(());
            }

            let forward = Message::SuccessorQuery(SuccessorQuery {
                hops: query.hops + 1,
                ..query
            });
            return self.socket.send(&forward, self.successor.addr).await;
        };

        let reply = SuccessorReply {
            req_id: query.id,
            successor: owner,
        };

        if query.from == self.this.addr {
            self.handle_successor_reply(reply);
            Ok(())
        } else {
            self.socket
                .send(&Message::SuccessorReply(reply), query.from)
                .await
        }
    }

    fn handle_successor_reply(&mut self, reply: SuccessorReply) {
        match self.fingers.index_for_target(reply.req_id) {
            Some(index) => {
                self.fingers.update(index, reply.successor);
            }
            None => log::debug!(
                "{}: Dropping successor reply for {} which matches no finger",
                self.this,
                reply.req_id
            ),
        }
    }

    fn handle_notify(&mut self, notify: Notify) {
        let candidate = notify.predecessor;

        if candidate.id == self.this.id {
            return;
        }

        let accept = match self.predecessor {
            None => true,
            Some(current) => id::contains_open(current.id, self.this.id, candidate.id),
        };

        if accept {
            self.predecessor = Some(candidate);
            log::info!("{}: Predecessor is now {}. {}", self.this, candidate, self);
        }
    }

    async fn handle_stabilize_reply(&mut self, reply: StabilizeReply) -> Result<(), HandlerError> {
        if let Some(candidate) = reply.predecessor {
            if candidate.id != self.this.id
                && id::contains_open(self.this.id, self.successor.id, candidate.id)
            {
                self.set_successor(candidate);
            }
        }

        if !self.is_sole_member() {
            let notify = Message::Notify(Notify {
                predecessor: self.this,
            });
            self.socket.send(&notify, self.successor.addr).await?;
        }

        self.refresh_fingers().await;
        Ok(())
    }

    /// Issue one successor query per finger slot. Those we can answer ourselves update the table
    /// right away, the rest come back as `SUCCESSOR_REPLY`.
    async fn refresh_fingers(&mut self) {
        for (_, target, _) in self.fingers.refresh() {
            let query = SuccessorQuery {
                id: target,
                from: self.this.addr,
                hops: 0,
            };

            if let Err(error) = self.handle_successor_query(query).await {
                log::debug!("{}: Failed to refresh finger for {}: {}", self.this, target, error);
            }
        }
    }

    async fn handle_put(&mut self, request: PutRequest) -> Result<(), HandlerError> {
        let key_id = self.space.hash(request.key.as_bytes());
        log::debug!("{}: Put {:?} ({})", self.this, request.key, key_id);

        match self.route(key_id) {
            Route::Local => {
                let reply = if !self.fits_get_reply(&request.key, &request.value)? {
                    log::warn!("{}: Refusing to store {:?}: value too large", self.this, request.key);
                    self.nack(
                        nack_code::VALUE_TOO_LARGE,
                        request.transaction_id,
                        &request.key,
                        request.hops,
                    )
                } else if self.store.add_item(request.key.clone(), request.value) {
                    Message::Ack(Ack {
                        transaction_id: request.transaction_id,
                        key: request.key.clone(),
                        value: None,
                        owner: self.this,
                        hops: request.hops,
                    })
                } else {
                    log::debug!("{}: Refusing to overwrite {:?}", self.this, request.key);
                    self.nack(
                        nack_code::DUPLICATE_KEY,
                        request.transaction_id,
                        &request.key,
                        request.hops,
                    )
                };

                self.send_or_nack(
                    &reply,
                    request.from,
                    request.transaction_id,
                    &request.key,
                    request.hops,
                    request.from,
                )
                .await
            }
            Route::Forward(_) if request.hops >= self.max_hops => {
                let reply = self.nack(
                    nack_code::HOP_LIMIT_EXCEEDED,
                    request.transaction_id,
                    &request.key,
                    request.hops,
                );
                self.socket.send(&reply, request.from).await
            }
            Route::Forward(next) => {
                let (transaction_id, key, hops, from) = (
                    request.transaction_id,
                    request.key.clone(),
                    request.hops,
                    request.from,
                );
                let forward = Message::Put(PutRequest {
                    hops: request.hops + 1,
                    ..request
                });

                self.send_or_nack(&forward, next, transaction_id, &key, hops, from)
                    .await
            }
        }
    }

    async fn handle_get(&mut self, request: GetRequest) -> Result<(), HandlerError> {
        let key_id = self.space.hash(request.key.as_bytes());
        log::debug!("{}: Get {:?} ({})", self.this, request.key, key_id);

        match self.route(key_id) {
            Route::Local => {
                let reply = match self.store.find_item(&request.key) {
                    Some(value) => Message::Ack(Ack {
                        transaction_id: request.transaction_id,
                        key: request.key.clone(),
                        value: Some(value.to_vec()),
                        owner: self.this,
                        hops: request.hops,
                    }),
                    None => self.nack(
                        nack_code::KEY_NOT_FOUND,
                        request.transaction_id,
                        &request.key,
                        request.hops,
                    ),
                };

                self.send_or_nack(
                    &reply,
                    request.from,
                    request.transaction_id,
                    &request.key,
                    request.hops,
                    request.from,
                )
                .await
            }
            Route::Forward(_) if request.hops >= self.max_hops => {
                let reply = self.nack(
                    nack_code::HOP_LIMIT_EXCEEDED,
                    request.transaction_id,
                    &request.key,
                    request.hops,
                );
                self.socket.send(&reply, request.from).await
            }
            Route::Forward(next) => {
                let forward = Message::Get(GetRequest {
                    hops: request.hops + 1,
                    key: request.key.clone(),
                    ..request
                });

                self.send_or_nack(
                    &forward,
                    next,
                    request.transaction_id,
                    &request.key,
                    request.hops,
                    request.from,
                )
                .await
            }
        }
    }

    /// Would a `GET` for this entry ever be answerable?
    fn fits_get_reply(&self, key: &str, value: &[u8]) -> Result<bool, HandlerError> {
        let reply = Message::Ack(Ack {
            transaction_id: 0,
            key: key.to_owned(),
            value: Some(value.to_vec()),
            owner: self.this,
            hops: 0,
        });

        Ok(reply.max_encoded_len()? <= MAX_DATAGRAM_SIZE)
    }

    /// Send a put/get reply or forward. If it can't be sent, answer the requester at `from` with a
    /// `NACK` so it does not wait for nothing.
    async fn send_or_nack(
        &self,
        message: &Message,
        addr: SocketAddr,
        transaction_id: u32,
        key: &str,
        hops: u32,
        from: SocketAddr,
    ) -> Result<(), HandlerError> {
        let error = match self.socket.send(message, addr).await {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        log::warn!("{}: Failed to send to {addr:?}: {}", self.this, error);

        let code = match error {
            HandlerError::MessageTooLarge(_) => nack_code::VALUE_TOO_LARGE,
            // The requester itself is unreachable, nobody left to tell.
            HandlerError::SocketError(_) | HandlerError::Encode(_) if addr == from => {
                return Err(error)
            }
            HandlerError::SocketError(_) | HandlerError::Encode(_) => nack_code::FORWARD_FAILED,
        };

        let nack = self.nack(code, transaction_id, key, hops);
        self.socket.send(&nack, from).await
    }

    fn nack(&self, code: u8, transaction_id: u32, key: &str, hops: u32) -> Message {
        Message::Nack(Nack {
            transaction_id,
            code,
            key: key.to_owned(),
            owner: self.this,
            hops,
        })
    }

    fn route(&self, key_id: Id) -> Route {
        if !self.is_sole_member() && id::contains(self.this.id, self.successor.id, key_id) {
            return Route::Forward(self.successor.addr);
        }

        if self.owns(key_id) {
            return Route::Local;
        }

        let next = self.fingers.find(key_id);
        if next == self.this.addr {
            Route::Forward(self.successor.addr)
        } else {
            Route::Forward(next)
        }
    }

    fn owns(&self, key_id: Id) -> bool {
        match self.predecessor {
            Some(predecessor) => id::contains(predecessor.id, self.this.id, key_id),
            None => self.is_sole_member(),
        }
    }

    fn is_sole_member(&self) -> bool {
        self.successor.id == self.this.id
    }

    fn set_successor(&mut self, successor: NodeRef) {
        self.successor = successor;
        self.fingers.update_for_successor(successor);

        log::info!("{}: Successor is now {}. {}", self.this, successor, self);
    }

    fn state(&self) -> State {
        State {
            node: self.this,
            bits: self.space.bits(),
            joined: self.joined,
            successor: self.joined.then_some(self.successor),
            predecessor: self.predecessor,
            fingers: self.fingers.entries().to_vec(),
            stored_keys: self.store.len(),
        }
    }

    fn handle_get_local_addr(&self, tx: oneshot::Sender<SocketAddr>) {
        tx.send(self.socket.local_addr()).unwrap_or(())
    }

    fn shutdown(&mut self) {
        self.running = false;
    }
}

impl fmt::Display for DhtHandler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "DHT: {}; Successor: {}; Predecessor: {:?}; FingerTable: {}",
            self.joined,
            self.successor.id,
            self.predecessor.map(|p| p.id),
            self.fingers
        )
    }
}
