//! Network surface: one TCP port carrying the channel endpoint and a status page.

pub mod http;
pub mod websocket;

pub use http::router;
pub use websocket::{BrowserSocket, OriginPolicy};
