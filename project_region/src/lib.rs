pub mod config;
pub mod session;
pub mod shutdown;
pub mod simulation;
