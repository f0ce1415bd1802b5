//! 摄像头输入源 - 构造即开始采集, 持续产出最新帧

use crossbeam_channel::Receiver;

use super::Frame;

pub struct CameraSource {
    rx: Receiver<Frame>,
    pending: Option<Frame>,
}

impl CameraSource {
    /// 摄像头源创建后立即处于采集状态
    pub fn new(rx: Receiver<Frame>) -> Self {
        Self { rx, pending: None }
    }

    pub fn start(&mut self) {
        // 构造时已在采集
    }

    pub fn is_frame_ready(&mut self) -> bool {
        while let Ok(frame) = self.rx.try_recv() {
            self.pending = Some(frame);
        }
        self.pending.is_some()
    }

    pub fn get_frame(&mut self) -> Option<Frame> {
        self.pending.take()
    }
}
