pub mod server;
pub mod types;

pub use server::{router, run_http_server, run_stdio_server, AppState};
