// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 检测管线与逐帧驱动循环
// Yolo: 单帧 predict = decode → suppress → 标注
// Detector: 输入源 → 推理引擎 → 管线 → 渲染方

use std::time::Instant;

use crossbeam_channel::Receiver;
use ndarray::ArrayViewD;

use crate::config::SessionConfig;
use crate::detection::nms::class_wise_nms;
use crate::detection::types::Detection;
use crate::detection::TensorDecoder;
use crate::error::DetectError;
use crate::labels;
use crate::source::{Frame, FrameSource, SourceEvent};

#[cfg(feature = "gpu")]
use crate::gpu::GpuPostProcessor;

// ========== 协作方边界接口 ==========

/// 推理引擎边界: 帧 → 原始输出张量 [1, 4+nc, anchors]
/// 模型本身与推理过程在核心范围之外
pub trait InferenceEngine {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<ndarray::Array<f32, ndarray::IxDyn>>;
}

/// 渲染边界: 消费最终检测列表, 核心不依赖任何渲染实现
pub trait Presenter {
    fn render(&mut self, detections: &[Detection]);
}

// ========== 执行后端 ==========

/// 后处理执行后端, 会话开始时选定
pub enum Backend {
    /// 顺序路径: TensorDecoder + class_wise_nms
    Cpu,
    /// 并行路径: wgpu解码+NMS内核, 输出契约与CPU路径一致
    #[cfg(feature = "gpu")]
    Gpu(GpuPostProcessor),
}

// ========== 检测管线 ==========

/// 检测会话
///
/// 阈值在构造时校验并固定, 检测周期内只读;
/// 两帧之间可通过 set_conf/set_iou 更新 (下一帧生效)。
pub struct Yolo {
    conf_threshold: f32,
    iou_threshold: f32,
    decoder: TensorDecoder,
    backend: Backend,
    profile: bool,
}

impl Yolo {
    /// 从会话配置创建管线; GPU后端在此处初始化, 资源缺失快速失败
    pub fn new(config: &SessionConfig) -> Result<Self, DetectError> {
        config.validate()?;
        let decoder = TensorDecoder::new(config.num_classes, config.box_encoding)?;

        let backend = if config.use_gpu {
            #[cfg(feature = "gpu")]
            {
                Backend::Gpu(GpuPostProcessor::new()?)
            }
            #[cfg(not(feature = "gpu"))]
            {
                return Err(DetectError::Configuration(
                    "gpu backend requested but the `gpu` feature is not enabled".into(),
                ));
            }
        } else {
            Backend::Cpu
        };

        Ok(Self {
            conf_threshold: config.conf_threshold,
            iou_threshold: config.iou_threshold,
            decoder,
            backend,
            profile: false,
        })
    }

    /// 处理一帧原始输出张量, 返回去重后的最终检测列表
    ///
    /// 零检测返回空列表 (不是错误); 只有张量形状不符或后端资源不可用
    /// 才返回错误, 且不产出部分结果。
    pub fn predict(
        &mut self,
        tensor: &ArrayViewD<'_, f32>,
        image_width: u32,
        image_height: u32,
    ) -> Result<Vec<Detection>, DetectError> {
        let t_post = Instant::now();
        let kept = match &mut self.backend {
            Backend::Cpu => {
                let candidates = self.decoder.decode(
                    tensor,
                    image_width as f32,
                    image_height as f32,
                    self.conf_threshold,
                )?;
                class_wise_nms(candidates, self.iou_threshold)
            }
            #[cfg(feature = "gpu")]
            Backend::Gpu(gpu) => {
                self.decoder.validate_shape(tensor.shape())?;
                let contiguous = tensor.as_standard_layout();
                let data = contiguous
                    .as_slice()
                    .expect("standard-layout tensor is contiguous");
                gpu.process(
                    data,
                    tensor.shape()[2],
                    self.decoder.num_classes(),
                    self.decoder.encoding(),
                    image_width as f32,
                    image_height as f32,
                    self.conf_threshold,
                    self.iou_threshold,
                )?
            }
        };

        let mut detections = Vec::with_capacity(kept.len());
        for candidate in kept {
            detections.push(Detection {
                class_index: candidate.class_index,
                class_name: labels::class_name(candidate.class_index)?,
                color: labels::class_color(candidate.class_index)?,
                score: candidate.score,
                bbox: candidate.bbox,
            });
        }

        if self.profile {
            println!("[Postprocess]: {:?}, {} detections", t_post.elapsed(), detections.len());
        }
        Ok(detections)
    }

    pub fn conf(&self) -> f32 {
        self.conf_threshold
    }

    /// 仅允许在两帧之间调用
    pub fn set_conf(&mut self, val: f32) {
        self.conf_threshold = val;
    }

    pub fn iou(&self) -> f32 {
        self.iou_threshold
    }

    /// 仅允许在两帧之间调用
    pub fn set_iou(&mut self, val: f32) {
        self.iou_threshold = val;
    }

    pub fn set_profile(&mut self, val: bool) {
        self.profile = val;
    }
}

// ========== 逐帧驱动循环 ==========

/// 检测驱动器: 把输入源、推理引擎、后处理管线和渲染方接成每帧一个周期
pub struct Detector<E, P> {
    yolo: Yolo,
    engine: E,
    presenter: P,
    source: Option<FrameSource>,
    events: Receiver<SourceEvent>,
    processed_once: bool,
}

impl<E: InferenceEngine, P: Presenter> Detector<E, P> {
    pub fn new(yolo: Yolo, engine: E, presenter: P, events: Receiver<SourceEvent>) -> Self {
        Self {
            yolo,
            engine,
            presenter,
            source: None,
            events,
            processed_once: false,
        }
    }

    /// 设定输入源并启动检测
    pub fn start_detection(&mut self, mut source: FrameSource) {
        source.start();
        self.source = Some(source);
        self.processed_once = false;
    }

    /// 每次外部更新调用一帧; 源切换事件只在帧间按到达顺序应用
    pub fn update(&mut self) -> anyhow::Result<()> {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SourceEvent::Switch(source) => self.start_detection(source),
                SourceEvent::Stop => {
                    self.source = None;
                }
            }
        }

        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };
        if source.is_single_shot() && self.processed_once {
            return Ok(());
        }
        if source.is_frame_ready() {
            self.detect_frame()?;
        }
        Ok(())
    }

    /// 单帧周期: 取帧 → 推理 → 后处理 → 渲染
    /// 第N帧完全结束前不会触碰第N+1帧
    fn detect_frame(&mut self) -> anyhow::Result<()> {
        let Some(frame) = self.source.as_mut().and_then(|s| s.get_frame()) else {
            return Ok(());
        };

        let tensor = self.engine.infer(&frame)?;
        let detections = self
            .yolo
            .predict(&tensor.view(), frame.width, frame.height)?;
        self.presenter.render(&detections);
        self.processed_once = true;
        Ok(())
    }

    pub fn yolo_mut(&mut self) -> &mut Yolo {
        &mut self.yolo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};
    use std::sync::Arc;

    fn tensor_with_anchor(nc: usize, class: usize, score: f32) -> Array<f32, IxDyn> {
        let mut tensor = Array::zeros(IxDyn(&[1, 4 + nc, 1]));
        tensor[[0, 0, 0]] = 0.5;
        tensor[[0, 1, 0]] = 0.5;
        tensor[[0, 2, 0]] = 0.2;
        tensor[[0, 3, 0]] = 0.2;
        tensor[[0, 4 + class, 0]] = score;
        tensor
    }

    fn cpu_session() -> SessionConfig {
        SessionConfig::default()
    }

    #[test]
    fn test_predict_single_detection() {
        // 场景A 全链路: 一个锚点, 类0分数0.9 → 一个带标注的检测
        let mut yolo = Yolo::new(&cpu_session()).unwrap();
        let tensor = tensor_with_anchor(80, 0, 0.9);
        let detections = yolo.predict(&tensor.view(), 640, 640).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_index, 0);
        assert_eq!(detections[0].class_name, "person");
        assert!(detections[0].score >= 0.5);
    }

    #[test]
    fn test_predict_empty_is_ok() {
        let mut yolo = Yolo::new(&cpu_session()).unwrap();
        let tensor = tensor_with_anchor(80, 0, 0.2);
        let detections = yolo.predict(&tensor.view(), 640, 640).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_predict_bad_shape_is_error() {
        let mut yolo = Yolo::new(&cpu_session()).unwrap();
        let tensor = Array::zeros(IxDyn(&[1, 10, 5]));
        assert!(matches!(
            yolo.predict(&tensor.view(), 640, 640),
            Err(DetectError::InputShape { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = cpu_session();
        config.iou_threshold = 2.0;
        assert!(Yolo::new(&config).is_err());
    }

    #[test]
    fn test_output_scores_meet_threshold() {
        // 阈值性质: 每个输出分数 ≥ conf_threshold
        let mut config = cpu_session();
        config.conf_threshold = 0.6;
        let mut yolo = Yolo::new(&config).unwrap();
        let mut tensor = Array::zeros(IxDyn(&[1, 84, 3]));
        for (i, score) in [0.55f32, 0.65, 0.95].iter().enumerate() {
            tensor[[0, 0, i]] = 0.5;
            tensor[[0, 1, i]] = 0.5;
            tensor[[0, 2, i]] = 0.05;
            tensor[[0, 3, i]] = 0.05;
            tensor[[0, 4 + i, i]] = *score; // 不同类别, 互不抑制
        }
        let detections = yolo.predict(&tensor.view(), 640, 640).unwrap();
        assert_eq!(detections.len(), 2);
        for d in &detections {
            assert!(d.score >= 0.6);
        }
    }

    // ---- 驱动循环 ----

    struct FakeEngine {
        nc: usize,
        score: f32,
        calls: usize,
    }

    impl InferenceEngine for FakeEngine {
        fn infer(&mut self, _frame: &Frame) -> anyhow::Result<Array<f32, IxDyn>> {
            self.calls += 1;
            Ok(tensor_with_anchor(self.nc, 0, self.score))
        }
    }

    struct CollectingPresenter {
        rendered: Vec<usize>,
    }

    impl Presenter for CollectingPresenter {
        fn render(&mut self, detections: &[Detection]) {
            self.rendered.push(detections.len());
        }
    }

    #[test]
    fn test_same_frame_processed_once() {
        let yolo = Yolo::new(&cpu_session()).unwrap();
        let (_tx, events) = crate::source::source_channel();
        let engine = FakeEngine {
            nc: 80,
            score: 0.9,
            calls: 0,
        };
        let presenter = CollectingPresenter { rendered: vec![] };
        let mut detector = Detector::new(yolo, engine, presenter, events);

        let (feed, frames) = crossbeam_channel::bounded(4);
        detector.start_detection(FrameSource::Video(crate::source::VideoSource::new(frames)));

        feed.send(Frame {
            rgba_data: Arc::new(vec![0; 4]),
            width: 640,
            height: 640,
            frame_id: 0,
        })
        .unwrap();
        detector.update().unwrap();
        assert_eq!(detector.presenter.rendered, vec![1]);

        // 同一帧不会被处理第二次
        detector.update().unwrap();
        assert_eq!(detector.engine.calls, 1);

        feed.send(Frame {
            rgba_data: Arc::new(vec![0; 4]),
            width: 640,
            height: 640,
            frame_id: 1,
        })
        .unwrap();
        detector.update().unwrap();
        assert_eq!(detector.engine.calls, 2);
    }

    #[test]
    fn test_single_shot_image_processed_once() {
        // 图片源只处理一次, 之后的update是空转
        let path = std::env::temp_dir().join("yolov9_rs_single_shot.png");
        image::RgbaImage::new(8, 8).save(&path).unwrap();

        let yolo = Yolo::new(&cpu_session()).unwrap();
        let (_tx, events) = crate::source::source_channel();
        let engine = FakeEngine {
            nc: 80,
            score: 0.9,
            calls: 0,
        };
        let presenter = CollectingPresenter { rendered: vec![] };
        let mut detector = Detector::new(yolo, engine, presenter, events);

        let source = crate::source::ImageSource::new(path.to_str().unwrap()).unwrap();
        detector.start_detection(FrameSource::Image(source));

        detector.update().unwrap();
        detector.update().unwrap();
        detector.update().unwrap();
        assert_eq!(detector.engine.calls, 1);
        assert_eq!(detector.presenter.rendered.len(), 1);
    }

    #[test]
    fn test_source_switch_via_events() {
        let yolo = Yolo::new(&cpu_session()).unwrap();
        let (tx, events) = crate::source::source_channel();
        let engine = FakeEngine {
            nc: 80,
            score: 0.9,
            calls: 0,
        };
        let presenter = CollectingPresenter { rendered: vec![] };
        let mut detector = Detector::new(yolo, engine, presenter, events);
        assert!(detector.source.is_none());

        let (feed, frames) = crossbeam_channel::bounded(4);
        tx.send(SourceEvent::Switch(FrameSource::Video(
            crate::source::VideoSource::new(frames),
        )))
        .unwrap();
        feed.send(Frame {
            rgba_data: Arc::new(vec![0; 4]),
            width: 640,
            height: 640,
            frame_id: 0,
        })
        .unwrap();

        detector.update().unwrap();
        assert!(detector.source.is_some());
        assert_eq!(detector.engine.calls, 1);

        tx.send(SourceEvent::Stop).unwrap();
        detector.update().unwrap();
        assert!(detector.source.is_none());
    }
}
