pub mod locator;
pub mod signals;

pub use locator::{Locator, SessionFile};
pub use signals::SignalChannel;
