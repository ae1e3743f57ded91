//! Tamper-evident message containers

pub mod container;

pub use container::{ContainerState, MessageContainer, FRAME_PREFIX_LEN};
