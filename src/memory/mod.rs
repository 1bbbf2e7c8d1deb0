//! 记忆层：对话消息与步骤历史存储

pub mod conversation;
pub mod store;

pub use conversation::{Message, Role};
pub use store::{InMemoryStepStore, SqliteStepStore, StepStore, StoreError};
