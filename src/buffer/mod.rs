//! Frame buffers and the pool that moves them between the client and the application

pub mod frame;
pub mod pool;

pub use frame::FrameBuffer;
pub use pool::{BufferPool, Delivery};
