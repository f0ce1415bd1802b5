//! 会话配置 - 命令行参数与JSON配置文件

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::detection::types::BoxEncoding;
use crate::error::DetectError;
use crate::labels;

/// 命令行参数
#[derive(Parser, Clone, Debug)]
#[command(about = "YOLO检测后处理: 原始输出张量 → 去重后的标注框")]
pub struct Args {
    /// 原始输出张量文件 (f32 little-endian, [1, 4+nc, anchors] 展平)
    #[arg(long)]
    pub tensor: String,

    /// 锚点数 (张量第3维)
    #[arg(long)]
    pub anchors: usize,

    /// 类别数
    #[arg(long, default_value_t = labels::NUM_CLASSES)]
    pub nc: usize,

    /// 图像宽度 (像素)
    #[arg(long, default_value_t = 640)]
    pub width: u32,

    /// 图像高度 (像素)
    #[arg(long, default_value_t = 640)]
    pub height: u32,

    /// 置信度阈值
    #[arg(long, default_value_t = 0.5)]
    pub conf: f32,

    /// NMS IoU阈值
    #[arg(long, default_value_t = 0.4)]
    pub iou: f32,

    /// 框编码为 (xmin, ymin, w, h) 而不是 (cx, cy, w, h)
    #[arg(long, default_value_t = false)]
    pub corner_boxes: bool,

    /// 使用GPU后处理 (需要 `gpu` feature)
    #[arg(long, default_value_t = false)]
    pub gpu: bool,

    /// JSON配置文件路径 (存在时覆盖阈值/编码参数)
    #[arg(long)]
    pub config: Option<String>,

    /// 输出JSON而不是文本
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// 打印各阶段耗时
    #[arg(long, default_value_t = false)]
    pub profile: bool,
}

/// 检测会话参数配置
///
/// 阈值在会话开始时设置一次, 检测周期内只读; 两帧之间才允许更新。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    pub conf_threshold: f32, // 置信度阈值 [0,1]
    pub iou_threshold: f32,  // NMS IoU阈值 [0,1]
    pub num_classes: usize,  // 类别数
    pub box_encoding: BoxEncoding,
    pub use_gpu: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.5,
            iou_threshold: 0.4,
            num_classes: labels::NUM_CLASSES,
            box_encoding: BoxEncoding::CenterSize,
            use_gpu: false,
        }
    }
}

impl SessionConfig {
    /// 从JSON文件加载配置, 失败时回退默认值
    pub fn load(path: &str) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    println!("✅ 配置已加载: {}", path);
                    config
                }
                Err(e) => {
                    eprintln!("⚠️ 配置解析失败, 使用默认值: {}", e);
                    Self::default()
                }
            },
            Err(_) => {
                println!("📝 配置文件不存在, 使用默认值: {}", path);
                Self::default()
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 校验阈值范围, 越界视为配置错误 (启动期快速失败)
    pub fn validate(&self) -> Result<(), DetectError> {
        if !(0.0..=1.0).contains(&self.conf_threshold) || !self.conf_threshold.is_finite() {
            return Err(DetectError::Configuration(format!(
                "conf_threshold {} out of [0,1]",
                self.conf_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) || !self.iou_threshold.is_finite() {
            return Err(DetectError::Configuration(format!(
                "iou_threshold {} out of [0,1]",
                self.iou_threshold
            )));
        }
        if self.num_classes == 0 {
            return Err(DetectError::Configuration(
                "num_classes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl From<&Args> for SessionConfig {
    fn from(args: &Args) -> Self {
        Self {
            conf_threshold: args.conf,
            iou_threshold: args.iou,
            num_classes: args.nc,
            box_encoding: if args.corner_boxes {
                BoxEncoding::CornerSize
            } else {
                BoxEncoding::CenterSize
            },
            use_gpu: args.gpu,
        }
    }
}
