pub mod download;
pub mod info;
pub mod resolve;
pub mod search;
