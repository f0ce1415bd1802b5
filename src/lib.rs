// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLO检测后处理库: 原始输出张量 → 去重后的标注检测框
// 顺序路径与wgpu并行路径共享同一输出契约, 结果确定且无竞争
pub mod config; // 会话配置参数
pub mod detection; // 解码器与分类别NMS
pub mod error; // 错误分类
pub mod labels; // COCO类别注册表
pub mod pipeline; // 检测管线与逐帧驱动
pub mod source; // 输入源系统

#[cfg(feature = "gpu")]
pub mod gpu; // GPU并行后处理

pub use crate::config::{Args, SessionConfig};
pub use crate::detection::{
    class_wise_nms, Bbox, BoxEncoding, CandidateDetection, Detection, Rgba, TensorDecoder,
};
pub use crate::error::DetectError;
pub use crate::pipeline::{Backend, Detector, InferenceEngine, Presenter, Yolo};
pub use crate::source::{Frame, FrameSource, SourceEvent, SourceKind};

#[cfg(feature = "gpu")]
pub use crate::gpu::GpuPostProcessor;
