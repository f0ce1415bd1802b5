//! 检测管线 (Detection pipeline)
//!
//! 每帧一个完整周期, 调用线程同步执行, 严格逐帧:
//! ```text
//! 原始张量 → decode (阈值过滤) → suppress (分类别NMS) → 检测列表
//! ```
//! 第N帧结果完全算完之前绝不读第N+1帧输入, 不存在帧间流水线重叠。
//! 唯一的阻塞点是GPU后端的派发+回读, 派发一旦发出必须完成, 没有取消。
pub mod detector;

pub use detector::{Backend, Detector, InferenceEngine, Presenter, Yolo};
