pub mod auth;
pub mod cli;
pub mod credentials;
pub mod error;
pub mod filesystem;
pub mod multipart;
pub mod paths;
pub mod router;
pub mod s3_handlers;
pub mod server;
pub mod xml_responses;

#[cfg(test)]
mod tests;
