pub mod managers;

pub use managers::*;
