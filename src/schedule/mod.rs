pub mod types;
pub mod processors;
pub mod scheduler;
pub mod callback;
#[cfg(test)]
mod tests;

// 重导出主要类型
pub use types::{ConversionTask, RetentionPolicy, TaskStatus};
pub use callback::{ChannelCallback, TaskCallback, TaskEvent};

// 重导出处理器接口
pub use processors::TaskProcessor;
pub use processors::convert::SimulatedConverter;

// 重导出调度器接口
pub use scheduler::{TaskManager, TaskScheduler, TaskStats, TaskWorker};
