pub mod error;
pub mod result;
pub mod time;

pub use error::*;
pub use result::*;
pub use time::*;
