//! 类别注册表 (Class registry)
//!
//! COCO 80类的名称与显示颜色静态映射表,进程启动后只读,线程安全。
//! 越界索引返回显式的 UnknownClass 错误,绝不越界访问。

use once_cell::sync::Lazy;

use crate::detection::types::Rgba;
use crate::error::DetectError;

/// COCO 数据集类别数
pub const NUM_CLASSES: usize = 80;

/// 叠加显示透明度
const ALPHA: f32 = 0.25;

/// COCO 80类名称表
pub static CLASS_NAMES: [&str; NUM_CLASSES] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// 基础调色板,按类别序号循环复用
const BASE_COLORS: [(f32, f32, f32); 8] = [
    (0.929, 0.490, 0.192),
    (0.850, 0.325, 0.098),
    (0.301, 0.745, 0.933),
    (0.466, 0.674, 0.188),
    (0.635, 0.078, 0.184),
    (0.000, 0.447, 0.741),
    (0.850, 0.125, 0.098),
    (0.929, 0.694, 0.125),
];

/// 80类颜色表 (基础调色板循环 + 固定透明度)
static CLASS_COLORS: Lazy<Vec<Rgba>> = Lazy::new(|| {
    (0..NUM_CLASSES)
        .map(|i| {
            let (r, g, b) = BASE_COLORS[i % BASE_COLORS.len()];
            Rgba::new(r, g, b, ALPHA)
        })
        .collect()
});

/// 查询类别名称
pub fn class_name(class_index: usize) -> Result<&'static str, DetectError> {
    CLASS_NAMES
        .get(class_index)
        .copied()
        .ok_or(DetectError::UnknownClass(class_index))
}

/// 查询类别显示颜色
pub fn class_color(class_index: usize) -> Result<Rgba, DetectError> {
    CLASS_COLORS
        .get(class_index)
        .copied()
        .ok_or(DetectError::UnknownClass(class_index))
}
