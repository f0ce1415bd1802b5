//! 视频输入源 - 消费外部解码线程喂入的帧序列
//!
//! 通过帧序号去重, 同一帧绝不处理两次; start之前不产出任何帧。

use crossbeam_channel::Receiver;

use super::Frame;

pub struct VideoSource {
    rx: Receiver<Frame>,
    pending: Option<Frame>,
    // 上一个已处理帧的序号, 只处理新的帧
    last_processed_frame: Option<u64>,
    playing: bool,
}

impl VideoSource {
    pub fn new(rx: Receiver<Frame>) -> Self {
        Self {
            rx,
            pending: None,
            last_processed_frame: None,
            playing: false,
        }
    }

    pub fn start(&mut self) {
        self.playing = true;
    }

    pub fn is_frame_ready(&mut self) -> bool {
        if !self.playing {
            return false;
        }
        // 清空通道积压, 只保留最新帧
        while let Ok(frame) = self.rx.try_recv() {
            self.pending = Some(frame);
        }
        match (&self.pending, self.last_processed_frame) {
            (Some(frame), Some(last)) => frame.frame_id != last,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn get_frame(&mut self) -> Option<Frame> {
        let frame = self.pending.clone()?;
        self.last_processed_frame = Some(frame.frame_id);
        Some(frame)
    }
}
