pub mod repository;
pub mod task_function;

pub use repository::*;
pub use task_function::*;
