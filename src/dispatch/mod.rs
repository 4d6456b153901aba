//! Background dispatch of blocking requests.
//!
//! A [`DispatchQueue`] owns one worker thread that executes boxed
//! [`Request`]s off the caller's thread. Managers share a queue through an
//! `Arc`; its lifecycle (`start` / `stop`) is explicit.

mod queue;

pub use queue::{
    DispatchConfig, DispatchQueue, DispatchStats, DrainOrder, Request, DEFAULT_POLL_INTERVAL,
};
