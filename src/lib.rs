pub mod api;
pub mod completion;
pub mod config;
pub mod errors;
pub mod poll;
pub mod relay;
pub mod render;
pub mod server;
pub mod stream;
