pub mod change;
pub mod config;
pub mod sim;
pub mod version;
