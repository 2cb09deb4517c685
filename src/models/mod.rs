pub mod enums;

mod journey;
mod protocol;
mod rule;

pub use journey::*;
pub use protocol::*;
pub use rule::*;
