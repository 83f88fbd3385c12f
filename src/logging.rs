//! Unified logging macro.
//!
//! `knx_log!` routes diagnostics to `defmt` on embedded targets (the
//! `defmt` feature), to the `log` crate facade on hosted targets (the
//! `log` feature), and compiles to nothing when neither backend is
//! enabled. The stack logs state transitions, dropped frames, retransmits
//! and security events; it never logs key material.
//!
//! # Usage
//!
//! ```rust,ignore
//! knx_log!(info, "channel {} established", channel_id);
//! knx_log!(debug, "dropping malformed datagram ({} bytes)", n);
//! knx_log!(warn, "heartbeat lost");
//! ```

/// Log through the configured backend.
#[macro_export]
#[cfg(feature = "defmt")]
macro_rules! knx_log {
    (trace, $($arg:tt)*) => { defmt::trace!($($arg)*) };
    (debug, $($arg:tt)*) => { defmt::debug!($($arg)*) };
    (info, $($arg:tt)*) => { defmt::info!($($arg)*) };
    (warn, $($arg:tt)*) => { defmt::warn!($($arg)*) };
    (error, $($arg:tt)*) => { defmt::error!($($arg)*) };
}

/// Log through the configured backend.
#[macro_export]
#[cfg(all(not(feature = "defmt"), feature = "log"))]
macro_rules! knx_log {
    (trace, $($arg:tt)*) => { log::trace!($($arg)*) };
    (debug, $($arg:tt)*) => { log::debug!($($arg)*) };
    (info, $($arg:tt)*) => { log::info!($($arg)*) };
    (warn, $($arg:tt)*) => { log::warn!($($arg)*) };
    (error, $($arg:tt)*) => { log::error!($($arg)*) };
}

/// Log through the configured backend (disabled: no backend feature).
#[macro_export]
#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
macro_rules! knx_log {
    ($level:ident, $($arg:tt)*) => {{}};
}
