//! 存储层：引擎、持久化适配器和数据模型

pub mod engine;
pub mod keeper;
pub mod models;

pub use engine::Storage;
pub use keeper::{DatabaseKeeper, FileKeeper, Keeper, KeeperFactory, MemoryKeeper};
pub use models::{
    BatchReport, DeletionRequest, Inserted, UrlMap, UrlRecord, UserMap, UserRecord,
    key_from_short_url,
};
