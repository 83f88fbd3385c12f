//! KNXnet/IP protocol layer.
//!
//! Bottom-up: [`constants`] holds the identifier spaces, [`frame`] the
//! outer frame codec, [`structures`] the embedded HPAI/CRI/CRD/DIB/SRP
//! blocks, [`services`] the per-service frame grammars, [`cemi`] and
//! [`device_mgmt`] the embedded payload codecs, and [`connection`] /
//! [`endpoint`] the channel state machine with its async driver.

pub mod cemi;
pub mod connection;
pub mod constants;
pub mod device_mgmt;
pub mod endpoint;
pub mod frame;
pub mod routing;
pub mod services;
pub mod structures;
