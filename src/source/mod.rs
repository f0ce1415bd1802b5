//! 输入源系统 (Frame source system)
//!
//! 图片/视频/摄像头三种输入源收拢成一个带标签的枚举,
//! 共享能力集 {get_frame, is_frame_ready, is_single_shot, start},
//! 通过对标签的match分发, 不使用开放式继承。
//!
//! 视频/摄像头源由外部解码线程经有界通道喂入已解码帧;
//! 解码器本身在边界之外, 本模块只消费帧。
pub mod camera;
pub mod events;
pub mod image;
pub mod video;

use std::sync::Arc;

pub use camera::CameraSource;
pub use events::{source_channel, SourceEvent};
pub use image::ImageSource;
pub use video::VideoSource;

// ========== 数据结构 ==========

/// 已解码帧 (解码侧 → 检测侧)
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba_data: Arc<Vec<u8>>, // 使用Arc共享数据,避免复制
    pub width: u32,
    pub height: u32,
    pub frame_id: u64, // 帧序号
}

/// 数据源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Image,
    Camera,
    Video,
}

/// 输入源 (图片源/视频源/摄像头源)
pub enum FrameSource {
    Image(ImageSource),
    Video(VideoSource),
    Camera(CameraSource),
}

impl FrameSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            FrameSource::Image(_) => SourceKind::Image,
            FrameSource::Video(_) => SourceKind::Video,
            FrameSource::Camera(_) => SourceKind::Camera,
        }
    }

    /// 获取当前帧数据
    pub fn get_frame(&mut self) -> Option<Frame> {
        match self {
            FrameSource::Image(source) => source.get_frame(),
            FrameSource::Video(source) => source.get_frame(),
            FrameSource::Camera(source) => source.get_frame(),
        }
    }

    /// 帧更新是否就绪
    pub fn is_frame_ready(&mut self) -> bool {
        match self {
            FrameSource::Image(source) => source.is_frame_ready(),
            FrameSource::Video(source) => source.is_frame_ready(),
            FrameSource::Camera(source) => source.is_frame_ready(),
        }
    }

    /// 是否单帧处理数据 (图片只处理一次)
    pub fn is_single_shot(&self) -> bool {
        matches!(self, FrameSource::Image(_))
    }

    /// 非单帧数据的播放
    pub fn start(&mut self) {
        match self {
            FrameSource::Image(_) => {} // 图片源无播放概念
            FrameSource::Video(source) => source.start(),
            FrameSource::Camera(source) => source.start(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_dispatch() {
        let (_tx, rx) = crossbeam_channel::bounded(4);
        let source = FrameSource::Video(VideoSource::new(rx));
        assert_eq!(source.kind(), SourceKind::Video);
        assert!(!source.is_single_shot());
    }
}
