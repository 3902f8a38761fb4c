pub mod capability;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod handshake;
pub mod identity;
pub mod loopback;
pub mod manager;
pub mod proxy;
pub mod registry;
pub mod router;
pub mod server;
pub mod sim;
pub mod target;
pub mod transport;
pub mod worker;
