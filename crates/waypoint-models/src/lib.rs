pub mod availability;
pub mod channel;
pub mod close;
pub mod frame;
pub mod thread;
