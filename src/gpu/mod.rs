//! GPU并行后处理 (wgpu compute)
//!
//! 在数据并行加速器上执行解码+NMS, 保持与CPU路径完全一致的输出契约。
pub mod postprocess;

pub use postprocess::GpuPostProcessor;
