pub mod cache;
pub mod forward;
pub mod headers;
pub mod streaming;

pub use cache::{ProxyCache, ProxyTarget, ProxyTransportConfig};
pub use forward::{BufferedForwarder, ForwardRequest};
pub use streaming::{StreamingForwarder, StreamingPolicy, STREAM_CHUNK_SIZE};
