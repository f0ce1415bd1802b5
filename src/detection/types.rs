//! 检测系统数据结构定义
//! Data structures for the detection post-processing pipeline

use serde::{Deserialize, Serialize};

// ========== 枚举类型 ==========

/// 边界框编码约定 (由模型决定,配置时显式指定,绝不自动探测)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoxEncoding {
    /// (cx, cy, w, h) 中心点+宽高 (YOLO检测头)
    CenterSize,
    /// (xmin, ymin, w, h) 左上角+宽高
    CornerSize,
}

// ========== 数据结构 ==========

/// 检测框 (Detection bounding box), 像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bbox {
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
        }
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let w = (self.xmax().min(another.xmax()) - self.xmin.max(another.xmin)).max(0.);
        let h = (self.ymax().min(another.ymax()) - self.ymin.max(another.ymin)).max(0.);
        w * h
    }

    /// IoU = 交集 / 并集; 零面积框对的并集为0时定义 IoU = 0,避免除零
    pub fn iou(&self, another: &Bbox) -> f32 {
        let inter = self.intersection_area(another);
        let union = self.area() + another.area() - inter;
        if union <= 0. {
            return 0.;
        }
        inter / union
    }
}

/// 显示颜色, 各通道 [0,1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// 候选检测 (解码器 → 抑制器), 仅存活于单帧处理期间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateDetection {
    pub class_index: usize,
    pub score: f32,
    pub bbox: Bbox,
    /// 原始锚点序号, 分数并列时的确定性决胜键
    pub anchor_index: usize,
}

/// 最终检测结果 (管线 → 渲染方), 返回后归调用方所有
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_index: usize,
    pub class_name: &'static str,
    pub color: Rgba,
    pub score: f32,
    pub bbox: Bbox,
}
