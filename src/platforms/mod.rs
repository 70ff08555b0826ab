pub use medialoader_core::platforms::traits;
pub use medialoader_core::platforms::Service;

pub mod soundcloud;
pub mod spotify;
pub mod youtube;
