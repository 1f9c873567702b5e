pub(crate) mod connection;
pub(crate) mod models;

pub(crate) use connection::Connection;
