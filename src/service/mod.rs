//! Tower middleware used on the connect path.

mod timeout;

pub(crate) use self::timeout::TimeoutLayer;
