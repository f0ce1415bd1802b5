//! 错误分类 (Error taxonomy)
//!
//! 结构性错误才会上抛: 配置缺失、张量形状不匹配、显存分配失败。
//! 数值边界情况 (零候选、零面积框) 是合法的空结果,不是错误。

use thiserror::Error;

/// 检测管线错误
#[derive(Debug, Error)]
pub enum DetectError {
    /// 启动期资源缺失或配置非法 (GPU适配器/内核不可用、阈值越界)
    /// 管线不可用,需要修复后重建
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 输入张量形状与 [1, 4+nc, anchors] 约定不符
    /// 当前帧中止,不返回检测结果,管线本身存活
    #[error("input tensor shape mismatch: expected {expected}, got {actual}")]
    InputShape { expected: String, actual: String },

    /// 设备缓冲区分配失败,当前帧中止并释放资源,下一帧重新尝试
    #[error("device resource exhausted: {0}")]
    ResourceExhaustion(String),

    /// 类别索引超出标签表范围 (模型输出损坏)
    #[error("unknown class index {0}")]
    UnknownClass(usize),
}

pub type Result<T> = std::result::Result<T, DetectError>;
