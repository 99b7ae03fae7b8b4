mod traits;
pub use traits::*;
pub mod utils;

mod sage;
pub use sage::{Sage, SageConv, SageParams};
