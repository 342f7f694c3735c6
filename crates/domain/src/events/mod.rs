//! 领域事件定义
//!
//! 上游模型流式响应解码后的事件

pub mod stream_event;

// 重新导出事件类型
pub use stream_event::StreamEvent;
