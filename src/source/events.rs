//! 源切换事件队列 (Source-selection events)
//!
//! 源选择用显式消息传递: UI侧把构造好的新输入源投入队列,
//! 检测循环在两帧之间按到达顺序取出应用。
//! 不使用订阅者回调, 事件顺序与生命周期都是显式的。

use crossbeam_channel::{Receiver, Sender};

use super::FrameSource;

/// 源变更事件
pub enum SourceEvent {
    /// 切换到新输入源 (所有权随消息转移)
    Switch(FrameSource),
    /// 停止当前源
    Stop,
}

/// 创建源事件通道
pub fn source_channel() -> (Sender<SourceEvent>, Receiver<SourceEvent>) {
    crossbeam_channel::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceKind;

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, rx) = source_channel();
        let (_feed, frames) = crossbeam_channel::bounded(1);
        tx.send(SourceEvent::Switch(FrameSource::Video(
            crate::source::VideoSource::new(frames),
        )))
        .unwrap();
        tx.send(SourceEvent::Stop).unwrap();

        match rx.try_recv().unwrap() {
            SourceEvent::Switch(source) => assert_eq!(source.kind(), SourceKind::Video),
            SourceEvent::Stop => panic!("switch event must arrive first"),
        }
        assert!(matches!(rx.try_recv().unwrap(), SourceEvent::Stop));
    }
}
