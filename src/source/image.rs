//! 图片输入源 - 从磁盘加载单张图片, 只处理一次

use std::sync::Arc;

use super::Frame;

pub struct ImageSource {
    frame: Frame,
}

impl ImageSource {
    /// 从文件加载图片并解码为RGBA帧
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let img = image::open(path)
            .map_err(|e| anyhow::anyhow!("failed to load image {path}: {e}"))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self {
            frame: Frame {
                rgba_data: Arc::new(img.into_raw()),
                width,
                height,
                frame_id: 0,
            },
        })
    }

    pub fn get_frame(&mut self) -> Option<Frame> {
        Some(self.frame.clone())
    }

    pub fn is_frame_ready(&mut self) -> bool {
        true
    }
}
