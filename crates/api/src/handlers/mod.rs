pub mod chat;
pub mod embeddings;
pub mod models;
pub mod playground;
