//! KNX addressing.
//!
//! KNX uses two address spaces carried in the same 2-octet field:
//! - individual addresses for physical devices (Area.Line.Device),
//! - group addresses for logical functions (Main/Middle/Sub or Main/Sub).
//!
//! Which one a cEMI frame's destination field holds is decided by the
//! address-type bit in control field 2, never by the value itself.

pub mod group;
pub mod individual;

pub use group::GroupAddress;
pub use individual::IndividualAddress;
