#![cfg_attr(all(not(test), not(feature = "std")), no_std)]

//! # knxnet
//!
//! KNXnet/IP client stack for Rust: the wire codec, the endpoint connection
//! state machines and the KNX Secure overlay, written `no_std`-first for
//! the Embassy async runtime and fully testable on the host through a mock
//! transport.
//!
//! ## Features
//!
//! - Exact KNXnet/IP frame codec: headers, HPAI/CRI/CRD/DIB/SRP structures,
//!   every core/tunneling/routing/secure service grammar
//! - cEMI link-layer and device-management codecs with TPDU (TPCI/APCI)
//!   handling
//! - Tunneling and device-management endpoints: handshake, heartbeat,
//!   acknowledged sends with retransmit, orderly disconnect
//! - Server discovery (classic and extended search with SRP filters)
//! - Multicast routing with busy/lost flow control
//! - KNXnet/IP Secure: X25519 session handshake, AES-CCM secure wrappers,
//!   timer-notify synchronization, ETS keyring unwrapping (`secure`
//!   feature)
//!
//! ## Example
//!
//! ```rust,no_run
//! use knxnet::addressing::{GroupAddress, IndividualAddress};
//! use knxnet::net::{IpEndpoint, Ipv4Addr};
//! use knxnet::protocol::cemi::LData;
//! use knxnet::protocol::endpoint::Endpoint;
//!
//! # async fn demo<T: knxnet::net::transport::AsyncTransport>(transport: T) -> knxnet::error::Result<()> {
//! let gateway = IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671);
//! let mut endpoint = Endpoint::tunnel(transport, gateway);
//! endpoint.connect().await?;
//!
//! let telegram = LData::group_write_small(
//!     IndividualAddress::new(1, 1, 1).unwrap(),
//!     GroupAddress::new(1, 0, 1).unwrap(),
//!     0x01,
//! );
//! endpoint.send(telegram.to_bytes()?.as_slice()).await?;
//! endpoint.disconnect().await?;
//! # Ok(()) }
//! ```

pub mod addressing;
pub mod bytes;
pub mod config;
pub mod discovery;
pub mod error;
pub mod net;
pub mod protocol;
pub mod secure;

// Macro modules (must be declared before use)
#[macro_use]
pub mod logging;

// Re-export commonly used types
#[doc(inline)]
pub use addressing::{GroupAddress, IndividualAddress};
#[doc(inline)]
pub use bytes::ByteStore;
#[doc(inline)]
pub use config::ConnectionConfig;
#[doc(inline)]
pub use error::{KnxError, Result};
#[doc(inline)]
pub use net::{IpEndpoint, Ipv4Addr};
#[doc(inline)]
pub use protocol::connection::EndpointState;
#[doc(inline)]
pub use protocol::endpoint::{Endpoint, EndpointEvent};
