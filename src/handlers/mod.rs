pub mod chat_handlers;
pub mod health;
