pub mod health;
pub mod process;
pub mod resources;

pub use health::*;
pub use process::*;
pub use resources::*;
