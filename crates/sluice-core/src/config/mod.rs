pub mod controller;
pub mod retry;

pub use controller::ControllerConfig;
pub use retry::RetryPolicy;
