pub mod dispatcher;
pub mod server;

pub use dispatcher::GatewayDispatcher;
pub use server::{build_router, GatewayServer};
