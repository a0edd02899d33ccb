pub mod chat;
pub mod health;
pub mod heartbeat;
pub mod info;
pub mod objectives;
pub mod tasks;
