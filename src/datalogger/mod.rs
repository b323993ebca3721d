pub mod packet;
pub mod session;
pub mod transport;
