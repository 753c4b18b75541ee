// Middleware modules
pub mod logging;
pub mod rate_limit;
pub mod security_headers;
