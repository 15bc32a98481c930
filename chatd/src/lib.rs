//! Avatar chat daemon: turns a user message into scripted, voiced and
//! lip-synced dialogue lines for a 3D avatar front end.

pub mod codec;
pub mod command;
pub mod coordinator;
pub mod http_server;
pub mod media;
pub mod session;
