pub mod chat;
pub mod memory;
pub mod prompt;
pub mod retrieve;
pub mod session;
pub mod sweep;
pub mod upload;
