use crate::{compact, id::Id};
use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr};

/// Node id + its socket address.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: Id,
    #[serde(with = "compact::addr")]
    pub addr: SocketAddr,
}

impl NodeRef {
    pub fn new(id: Id, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}
