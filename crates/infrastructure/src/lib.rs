//! 持久化层：内存仓储和文件系统仓储

pub mod repository;
pub mod repository_factory;

pub use repository::{FileSystemRepository, InMemoryRepository};
pub use repository_factory::RepositoryFactory;
