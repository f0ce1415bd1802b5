//! 检测后处理核心 (Detection post-processing core)
//!
//! 单帧数据流严格单向:
//! 原始张量 → Decoder (阈值过滤+编码转换) → NMS (分类别去重) → 检测列表
//!
//! - `types`:   数据模型 (Bbox / 候选 / 最终检测)
//! - `decoder`: 张量解码器
//! - `nms`:     分类别非极大值抑制
pub mod decoder;
pub mod nms;
pub mod types;

pub use decoder::TensorDecoder;
pub use nms::class_wise_nms;
pub use types::{Bbox, BoxEncoding, CandidateDetection, Detection, Rgba};
