//! # Event subscribers.
//!
//! [`Subscribe`] is the extension point for reacting to queue events;
//! [`SubscriberSet`] fans each event out to every subscriber through its own
//! bounded queue and worker.
//!
//! ```text
//! Bus ──► queue listener ──► SubscriberSet::emit(&Event)
//!                               ├──► LogWriter (feature "logging")
//!                               ├──► metrics / audit / custom ...
//!                               └──► ...
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscriber;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
