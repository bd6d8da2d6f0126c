// Adapters layer: concrete implementations of the domain ports (Google OAuth, Drive, HubSpot, local files).

pub mod drive;
pub mod http;
pub mod hubspot;
pub mod oauth;
pub mod storage;
