pub mod chat;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod prompt;
pub mod vector_store;
