pub mod config;
pub mod control;
pub mod messages;
pub mod motor;
pub mod robot;
pub mod runtime;
pub mod sim;
