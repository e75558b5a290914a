mod outcome;
mod probe;
mod proxy;

pub use outcome::*;
pub use probe::*;
pub use proxy::*;
