pub mod actors;
pub mod cli;
pub mod error;
pub mod github;
pub mod models;
pub mod pipeline;
pub mod policy;
pub mod report;
pub mod server;
pub mod types;
