pub mod captcha;
pub mod events;
pub mod handlers;
pub mod middleware;
pub mod proxies;
pub mod routes;
pub mod tasks;
pub mod ws;

pub use routes::create_router;
pub use ws::WsMessage;
