pub mod algorithms;
pub mod compositor;
pub mod config;
pub mod error;
pub mod landmarks;
pub mod logging;
pub mod registration;
pub mod session;
pub mod source;

pub use algorithms::*;
pub use compositor::*;
pub use error::{AlignError, Result};
pub use landmarks::*;
pub use registration::*;
pub use session::*;
pub use source::*;
