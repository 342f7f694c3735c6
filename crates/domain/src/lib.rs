//! 聊天网关核心领域模型
//!
//! 包含身份令牌、每日配额、聊天消息与上游流事件等实体，以及存储层接口。

pub mod entities;
pub mod errors;
pub mod events;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use repositories::*;
pub use value_objects::*;
