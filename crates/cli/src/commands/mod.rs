pub mod chat;
pub mod gateway;
pub mod onboard;
pub mod serve_tools;
pub mod tools;
