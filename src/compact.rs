//! Compact representation of socket addresses.

use std::{
    convert::TryInto,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

const SOCKET_ADDR_V4_LEN: usize = 6;
const SOCKET_ADDR_V6_LEN: usize = 18;

/// Serialize/deserialize a single `SocketAddr` as a 6 (IPv4) or 18 (IPv6) byte string.
pub(crate) mod addr {
    use serde::{
        de::{Deserialize, Deserializer, Error as _},
        ser::{Serialize, Serializer},
    };
    use serde_bytes::{ByteBuf, Bytes};
    use std::net::SocketAddr;

    pub(crate) fn serialize<S>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Bytes::new(&super::encode_socket_addr(addr)).serialize(s)
    }

    pub(crate) fn deserialize<'de, D>(d: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let buffer = ByteBuf::deserialize(d)?;

        super::decode_socket_addr(&buffer)
            .ok_or_else(|| D::Error::invalid_length(buffer.len(), &"6 or 18 bytes"))
    }
}

fn decode_socket_addr(src: &[u8]) -> Option<SocketAddr> {
    if src.len() == SOCKET_ADDR_V4_LEN {
        let addr: [u8; 4] = src.get(..4)?.try_into().ok()?;
        let addr = Ipv4Addr::from(addr);
        let port = u16::from_be_bytes(src.get(4..)?.try_into().ok()?);
        Some((addr, port).into())
    } else if src.len() == SOCKET_ADDR_V6_LEN {
        let addr: [u8; 16] = src.get(..16)?.try_into().ok()?;
        let addr = Ipv6Addr::from(addr);
        let port = u16::from_be_bytes(src.get(16..)?.try_into().ok()?);
        Some((addr, port).into())
    } else {
        None
    }
}

fn encode_socket_addr(addr: &SocketAddr) -> Vec<u8> {
    let mut buffer = match addr {
        SocketAddr::V4(addr) => {
            let mut buffer = Vec::with_capacity(SOCKET_ADDR_V4_LEN);
            buffer.extend(addr.ip().octets().as_ref());
            buffer
        }
        SocketAddr::V6(addr) => {
            let mut buffer = Vec::with_capacity(SOCKET_ADDR_V6_LEN);
            buffer.extend(addr.ip().octets().as_ref());
            buffer
        }
    };

    buffer.extend(addr.port().to_be_bytes().as_ref());
    buffer
}
