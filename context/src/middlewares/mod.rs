pub mod logging;
pub mod parser;
pub mod proxy;
pub mod rate_limiter;
pub mod robots;
pub mod user_agent;

pub use logging::RequestLogger;
pub use parser::Parser;
pub use proxy::ProxyInjector;
pub use rate_limiter::RateLimiter;
pub use robots::RobotsTxt;
pub use user_agent::UserAgentInjector;
