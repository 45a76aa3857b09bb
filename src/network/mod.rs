//! TCP front-end: length-prefixed JSON frames, the wire codec, and the
//! network server that bridges connections to the transaction plane.

pub mod codec;
pub mod connection;
pub mod server;

pub use connection::{MAX_FRAME_SIZE, SEND_TIMEOUT};
pub use server::{NetworkConfig, NetworkServer};
