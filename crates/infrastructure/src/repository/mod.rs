//! 持久化仓储实现

mod filesystem;
mod in_memory;

pub use filesystem::FileSystemRepository;
pub use in_memory::InMemoryRepository;
