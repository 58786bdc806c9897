pub mod connection;
pub mod handshake;
pub mod hostname;
pub mod packet;
pub mod router;
pub mod server;
pub mod status;
