pub mod auth;
pub mod cleanup;
pub mod cookies;
pub mod engine;
pub mod events;
pub mod expander;
pub mod fallback;
pub mod filename;
pub mod http_client;
pub mod metadata;
pub mod paths;
pub mod process;
pub mod registry;
pub mod scrape;
pub mod url_parser;
pub mod ytdlp;
