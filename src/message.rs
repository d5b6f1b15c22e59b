use crate::{compact, id::Id, routing::node::NodeRef};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Size of the receive buffer. Anything that does not fit is not a valid message.
pub(crate) const MAX_DATAGRAM_SIZE: usize = 1024;

/// Every datagram exchanged between peers (and between clients and peers).
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum Message {
    JoinRequest(JoinRequest),
    JoinReply(JoinReply),
    SuccessorQuery(SuccessorQuery),
    SuccessorReply(SuccessorReply),
    Notify(Notify),
    StabilizeReply(StabilizeReply),
    PredecessorQuery(PredecessorQuery),
    Put(PutRequest),
    Get(GetRequest),
    Ack(Ack),
    Nack(Nack),
}

impl Message {
    /// Decode the message from bencode.
    pub fn decode(input: &[u8]) -> Result<Self, serde_bencode::Error> {
        serde_bencode::from_bytes(input)
    }

    /// Encode the message into bencode.
    pub fn encode(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }

    /// Length of the encoding once the hop counter and the transaction id have grown to their
    /// widest. A message that fits by this measure fits at every hop.
    pub fn max_encoded_len(&self) -> Result<usize, serde_bencode::Error> {
        let mut message = self.clone();

        match &mut message {
            Message::JoinRequest(request) => request.hops = u32::MAX,
            Message::SuccessorQuery(query) => query.hops = u32::MAX,
            Message::Put(request) => {
                request.transaction_id = u32::MAX;
                request.hops = u32::MAX;
            }
            Message::Get(request) => {
                request.transaction_id = u32::MAX;
                request.hops = u32::MAX;
            }
            Message::Ack(ack) => {
                ack.transaction_id = u32::MAX;
                ack.hops = u32::MAX;
            }
            Message::Nack(nack) => {
                nack.transaction_id = u32::MAX;
                nack.hops = u32::MAX;
            }
            Message::JoinReply(_)
            | Message::SuccessorReply(_)
            | Message::Notify(_)
            | Message::StabilizeReply(_)
            | Message::PredecessorQuery(_) => (),
        }

        Ok(message.encode()?.len())
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct JoinRequest {
    pub node: NodeRef,
    pub hops: u32,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct JoinReply {
    pub successor: NodeRef,
}

/// Who owns `id`? The answer goes straight back to `from`.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct SuccessorQuery {
    pub id: Id,
    #[serde(with = "compact::addr")]
    pub from: SocketAddr,
    pub hops: u32,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct SuccessorReply {
    pub req_id: Id,
    pub successor: NodeRef,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct Notify {
    pub predecessor: NodeRef,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct StabilizeReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<NodeRef>,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct PredecessorQuery {
    pub id: Id,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct PutRequest {
    /// Picked by the client, echoed back in the `ACK`/`NACK`.
    #[serde(rename = "t")]
    pub transaction_id: u32,
    pub key: String,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
    #[serde(with = "compact::addr")]
    pub from: SocketAddr,
    pub hops: u32,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct GetRequest {
    #[serde(rename = "t")]
    pub transaction_id: u32,
    pub key: String,
    #[serde(with = "compact::addr")]
    pub from: SocketAddr,
    pub hops: u32,
}

/// Positive answer to a `PUT` (no value) or a `GET` (with the stored value).
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct Ack {
    #[serde(rename = "t")]
    pub transaction_id: u32,
    pub key: String,
    #[serde(
        with = "serde_bytes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Vec<u8>>,
    pub owner: NodeRef,
    pub hops: u32,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub(crate) struct Nack {
    #[serde(rename = "t")]
    pub transaction_id: u32,
    pub code: u8,
    pub key: String,
    pub owner: NodeRef,
    pub hops: u32,
}

pub mod nack_code {
    pub const DUPLICATE_KEY: u8 = 1;
    pub const KEY_NOT_FOUND: u8 = 2;
    pub const HOP_LIMIT_EXCEEDED: u8 = 3;
    /// The value would not fit the `ACK` of a later `GET`.
    pub const VALUE_TOO_LARGE: u8 = 4;
    /// The request could not be passed on to the next node.
    pub const FORWARD_FAILED: u8 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    // Address whose compact form is printable: "axje.u".
    fn printable_addr() -> SocketAddr {
        (Ipv4Addr::new(97, 120, 106, 101), 11893).into()
    }

    #[test]
    fn serialize_predecessor_query() {
        let encoded = "d4:argsd2:idi5ee6:method17:PREDECESSOR_QUERYe";
        let decoded = Message::PredecessorQuery(PredecessorQuery { id: Id::new(5) });

        assert_serialize_deserialize(encoded, &decoded)
    }

    #[test]
    fn serialize_notify() {
        let encoded = "d4:argsd11:predecessord4:addr6:axje.u2:idi5eee6:method6:NOTIFYe";
        let decoded = Message::Notify(Notify {
            predecessor: NodeRef::new(Id::new(5), printable_addr()),
        });

        assert_serialize_deserialize(encoded, &decoded)
    }

    #[test]
    fn serialize_join_request() {
        let encoded = "d4:argsd4:hopsi3e4:noded4:addr6:axje.u2:idi1023eee6:method12:JOIN_REQUESTe";
        let decoded = Message::JoinRequest(JoinRequest {
            node: NodeRef::new(Id::new(1023), printable_addr()),
            hops: 3,
        });

        assert_serialize_deserialize(encoded, &decoded)
    }

    #[test]
    fn serialize_successor_query() {
        let encoded = "d4:argsd4:from6:axje.u4:hopsi0e2:idi42ee6:method15:SUCCESSOR_QUERYe";
        let decoded = Message::SuccessorQuery(SuccessorQuery {
            id: Id::new(42),
            from: printable_addr(),
            hops: 0,
        });

        assert_serialize_deserialize(encoded, &decoded)
    }

    #[test]
    fn serialize_stabilize_reply_without_predecessor() {
        let encoded = "d4:argsde6:method15:STABILIZE_REPLYe";
        let decoded = Message::StabilizeReply(StabilizeReply { predecessor: None });

        assert_serialize_deserialize(encoded, &decoded)
    }

    #[test]
    fn serialize_stabilize_reply_with_predecessor() {
        let encoded = "d4:argsd11:predecessord4:addr6:axje.u2:idi7eee6:method15:STABILIZE_REPLYe";
        let decoded = Message::StabilizeReply(StabilizeReply {
            predecessor: Some(NodeRef::new(Id::new(7), printable_addr())),
        });

        assert_serialize_deserialize(encoded, &decoded)
    }

    #[test]
    fn serialize_put() {
        let encoded = "d4:argsd4:from6:axje.u4:hopsi0e3:key1:k1:ti7e5:value1:ve6:method3:PUTe";
        let decoded = Message::Put(PutRequest {
            transaction_id: 7,
            key: "k".to_owned(),
            value: b"v".to_vec(),
            from: printable_addr(),
            hops: 0,
        });

        assert_serialize_deserialize(encoded, &decoded)
    }

    #[test]
    fn serialize_ack_with_value() {
        let encoded =
            "d4:argsd4:hopsi2e3:key1:k5:ownerd4:addr6:axje.u2:idi10ee1:ti7e5:value1:ve6:method3:ACKe";
        let decoded = Message::Ack(Ack {
            transaction_id: 7,
            key: "k".to_owned(),
            value: Some(b"v".to_vec()),
            owner: NodeRef::new(Id::new(10), printable_addr()),
            hops: 2,
        });

        assert_serialize_deserialize(encoded, &decoded)
    }

    #[test]
    fn serialize_ack_without_value() {
        let encoded = "d4:argsd4:hopsi0e3:key1:k5:ownerd4:addr6:axje.u2:idi10ee1:ti7ee6:method3:ACKe";
        let decoded = Message::Ack(Ack {
            transaction_id: 7,
            key: "k".to_owned(),
            value: None,
            owner: NodeRef::new(Id::new(10), printable_addr()),
            hops: 0,
        });

        assert_serialize_deserialize(encoded, &decoded)
    }

    #[test]
    fn serialize_nack() {
        let encoded =
            "d4:argsd4:codei1e4:hopsi0e3:key1:k5:ownerd4:addr6:axje.u2:idi10ee1:ti7ee6:method4:NACKe";
        let decoded = Message::Nack(Nack {
            transaction_id: 7,
            code: nack_code::DUPLICATE_KEY,
            key: "k".to_owned(),
            owner: NodeRef::new(Id::new(10), printable_addr()),
            hops: 0,
        });

        assert_serialize_deserialize(encoded, &decoded)
    }

    #[test]
    fn max_encoded_len_covers_growing_counters() {
        let request = Message::Get(GetRequest {
            transaction_id: 0,
            key: "k".to_owned(),
            from: printable_addr(),
            hops: 0,
        });

        let actual = request.encode().unwrap().len();
        // Both counters go from 1 to 10 digits.
        assert_eq!(request.max_encoded_len().unwrap(), actual + 18);

        let notify = Message::Notify(Notify {
            predecessor: NodeRef::new(Id::new(5), printable_addr()),
        });
        assert_eq!(
            notify.max_encoded_len().unwrap(),
            notify.encode().unwrap().len()
        );
    }

    #[test]
    fn decode_rejects_unknown_method() {
        assert!(Message::decode(b"d4:argsde6:method5:LEAVEe").is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Message::decode(b"\x80\x03}q\x00").is_err());
        assert!(Message::decode(b"").is_err());
    }

    #[track_caller]
    fn assert_serialize_deserialize(encoded: &str, decoded: &Message) {
        assert_eq!(serde_bencode::to_string(decoded).unwrap(), encoded);
        assert_eq!(
            serde_bencode::from_str::<Message>(encoded).unwrap(),
            *decoded
        );
    }
}
