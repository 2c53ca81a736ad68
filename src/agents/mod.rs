mod session;
pub mod tools;

pub use session::*;
