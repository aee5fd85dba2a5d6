//! Standard event handler wrappers.

mod timeout;
mod traced;

pub use timeout::Timeout;
pub use traced::Traced;
