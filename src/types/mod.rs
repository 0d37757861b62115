//! Core types shared by the provider, tool and generation layers.

pub mod generation;
pub mod message;
pub mod stream;
pub mod usage;

pub use generation::*;
pub use message::*;
pub use stream::*;
pub use usage::*;
