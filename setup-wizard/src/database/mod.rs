pub mod connection;
pub mod descriptor;
pub mod dialect;
pub mod properties;
