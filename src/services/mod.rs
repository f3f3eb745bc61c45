//! Background services

pub mod actions;
pub mod rotation;

pub use actions::{FetchBodyAction, NoopAction, TickAction};
