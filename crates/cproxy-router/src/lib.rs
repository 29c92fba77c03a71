mod chat;
mod cors;

pub use chat::{GatewayState, build_completion_request, gateway_router};
pub use cors::cors_layer;
