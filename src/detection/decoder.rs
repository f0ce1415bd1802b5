// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 检测解码器 (Detection decoder)
// 原始输出张量 [1, 4+nc, anchors] → 通过置信度阈值的候选检测集合

use ndarray::{s, ArrayViewD, Axis};

use crate::detection::types::{Bbox, BoxEncoding, CandidateDetection};
use crate::error::DetectError;

/// 盒编码前的固定属性数 (4个框坐标)
const BOX_OFFSET: usize = 4;

/// 张量解码器
///
/// 每个锚点: 读4个框坐标 + nc个类别分数, argmax取最优类,
/// 低于阈值丢弃, 否则按编码约定转成像素空间 (xmin, ymin, w, h)。
/// 对相同输入输出的候选集合与遍历顺序无关 (顺序本身由抑制器规范化)。
pub struct TensorDecoder {
    num_classes: usize,
    encoding: BoxEncoding,
}

impl TensorDecoder {
    pub fn new(num_classes: usize, encoding: BoxEncoding) -> Result<Self, DetectError> {
        if num_classes == 0 {
            return Err(DetectError::Configuration(
                "num_classes must be at least 1".into(),
            ));
        }
        Ok(Self {
            num_classes,
            encoding,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn encoding(&self) -> BoxEncoding {
        self.encoding
    }

    /// 校验张量形状: 秩3, batch=1, 属性数 = 4 + nc
    pub fn validate_shape(&self, shape: &[usize]) -> Result<(), DetectError> {
        let expected = format!("[1, {}, num_anchors]", BOX_OFFSET + self.num_classes);
        if shape.len() != 3 || shape[0] != 1 || shape[1] != BOX_OFFSET + self.num_classes {
            return Err(DetectError::InputShape {
                expected,
                actual: format!("{:?}", shape),
            });
        }
        Ok(())
    }

    /// 解码一帧的原始输出张量
    ///
    /// 张量只读借用, 调用期间不得被修改。零锚点通过阈值 → 空集合,不是错误。
    pub fn decode(
        &self,
        tensor: &ArrayViewD<'_, f32>,
        image_width: f32,
        image_height: f32,
        conf_threshold: f32,
    ) -> Result<Vec<CandidateDetection>, DetectError> {
        self.validate_shape(tensor.shape())?;

        let preds = tensor.index_axis(Axis(0), 0);
        let mut candidates = Vec::new();

        for (anchor_index, pred) in preds.axis_iter(Axis(1)).enumerate() {
            let raw_box = pred.slice(s![0..BOX_OFFSET]);
            let scores = pred.slice(s![BOX_OFFSET..BOX_OFFSET + self.num_classes]);

            // argmax, 同分保留较小类别序号
            let (class_index, &score) = scores
                .into_iter()
                .enumerate()
                .reduce(|max, x| if x.1 > max.1 { x } else { max })
                .unwrap();

            // 非有限分数 (NaN/Inf) 视为损坏锚点直接丢弃, 保证后续排序是全序
            if !score.is_finite() || score < conf_threshold {
                continue;
            }
            if raw_box.iter().any(|v| !v.is_finite()) {
                continue;
            }

            let bbox = decode_box(
                self.encoding,
                [raw_box[0], raw_box[1], raw_box[2], raw_box[3]],
                image_width,
                image_height,
            );

            candidates.push(CandidateDetection {
                class_index,
                score,
                bbox,
                anchor_index,
            });
        }

        Ok(candidates)
    }
}

/// 编码转换: 归一化坐标 → 像素空间 (xmin, ymin, w, h), 并按图像边界截断
pub(crate) fn decode_box(
    encoding: BoxEncoding,
    raw: [f32; 4],
    image_width: f32,
    image_height: f32,
) -> Bbox {
    let (xmin, ymin, w, h) = match encoding {
        BoxEncoding::CenterSize => {
            let (cx, cy, w, h) = (raw[0], raw[1], raw[2], raw[3]);
            (cx - w / 2., cy - h / 2., w, h)
        }
        BoxEncoding::CornerSize => (raw[0], raw[1], raw[2], raw[3]),
    };

    Bbox::new(
        (xmin * image_width).max(0.).min(image_width),
        (ymin * image_height).max(0.).min(image_height),
        (w * image_width).max(0.),
        (h * image_height).max(0.),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};
    use rand::{Rng, SeedableRng};

    /// 构造 [1, 4+nc, anchors] 测试张量, anchors 列为 (box4, scores nc)
    fn build_tensor(nc: usize, anchors: Vec<([f32; 4], Vec<f32>)>) -> Array<f32, IxDyn> {
        let num_anchors = anchors.len();
        let mut tensor = Array::zeros(IxDyn(&[1, 4 + nc, num_anchors]));
        for (i, (raw_box, scores)) in anchors.into_iter().enumerate() {
            for (a, v) in raw_box.into_iter().enumerate() {
                tensor[[0, a, i]] = v;
            }
            for (c, v) in scores.into_iter().enumerate() {
                tensor[[0, 4 + c, i]] = v;
            }
        }
        tensor
    }

    fn one_hot(nc: usize, class: usize, score: f32) -> Vec<f32> {
        let mut scores = vec![0.0; nc];
        scores[class] = score;
        scores
    }

    #[test]
    fn test_single_anchor_above_threshold() {
        // 场景A: 一个锚点, 类0分数0.9, 阈值0.5 → 一个候选
        let tensor = build_tensor(80, vec![([0.5, 0.5, 0.2, 0.2], one_hot(80, 0, 0.9))]);
        let decoder = TensorDecoder::new(80, BoxEncoding::CenterSize).unwrap();
        let candidates = decoder.decode(&tensor.view(), 640., 640., 0.5).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class_index, 0);
        assert_eq!(candidates[0].score, 0.9);
        // (0.5, 0.5, 0.2, 0.2) 中心编码 → 左上 (0.4, 0.4), 尺寸 0.2 → 像素
        let bbox = candidates[0].bbox;
        assert!((bbox.xmin() - 0.4 * 640.).abs() < 1e-3);
        assert!((bbox.ymin() - 0.4 * 640.).abs() < 1e-3);
        assert!((bbox.width() - 0.2 * 640.).abs() < 1e-3);
        assert!((bbox.height() - 0.2 * 640.).abs() < 1e-3);
    }

    #[test]
    fn test_all_below_threshold_is_empty() {
        // 场景D: 全部低于阈值 → 空结果, 不是错误
        let tensor = build_tensor(
            80,
            vec![
                ([0.5, 0.5, 0.2, 0.2], one_hot(80, 3, 0.3)),
                ([0.1, 0.1, 0.1, 0.1], one_hot(80, 7, 0.49)),
            ],
        );
        let decoder = TensorDecoder::new(80, BoxEncoding::CenterSize).unwrap();
        let candidates = decoder.decode(&tensor.view(), 640., 640., 0.5).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_argmax_selects_best_class() {
        let mut scores = vec![0.1; 10];
        scores[6] = 0.8;
        scores[2] = 0.7;
        let tensor = build_tensor(10, vec![([0.5, 0.5, 0.2, 0.2], scores)]);
        let decoder = TensorDecoder::new(10, BoxEncoding::CenterSize).unwrap();
        let candidates = decoder.decode(&tensor.view(), 100., 100., 0.5).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class_index, 6);
    }

    #[test]
    fn test_corner_encoding() {
        let tensor = build_tensor(2, vec![([0.1, 0.2, 0.3, 0.4], one_hot(2, 1, 0.9))]);
        let decoder = TensorDecoder::new(2, BoxEncoding::CornerSize).unwrap();
        let candidates = decoder.decode(&tensor.view(), 100., 200., 0.5).unwrap();
        let bbox = candidates[0].bbox;
        assert!((bbox.xmin() - 10.).abs() < 1e-4);
        assert!((bbox.ymin() - 40.).abs() < 1e-4);
        assert!((bbox.width() - 30.).abs() < 1e-4);
        assert!((bbox.height() - 80.).abs() < 1e-4);
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let decoder = TensorDecoder::new(80, BoxEncoding::CenterSize).unwrap();

        // 秩错误
        let bad_rank = Array::zeros(IxDyn(&[84, 100]));
        assert!(matches!(
            decoder.decode(&bad_rank.view(), 640., 640., 0.5),
            Err(DetectError::InputShape { .. })
        ));

        // 属性数与 nc 不符
        let bad_attrs = Array::zeros(IxDyn(&[1, 10, 100]));
        assert!(matches!(
            decoder.decode(&bad_attrs.view(), 640., 640., 0.5),
            Err(DetectError::InputShape { .. })
        ));
    }

    #[test]
    fn test_zero_anchors_is_empty() {
        let tensor = Array::zeros(IxDyn(&[1, 84, 0]));
        let decoder = TensorDecoder::new(80, BoxEncoding::CenterSize).unwrap();
        assert!(decoder.decode(&tensor.view(), 640., 640., 0.5).unwrap().is_empty());
    }

    #[test]
    fn test_nan_scores_discarded() {
        let tensor = build_tensor(2, vec![([0.5, 0.5, 0.2, 0.2], vec![f32::NAN, 0.1])]);
        let decoder = TensorDecoder::new(2, BoxEncoding::CenterSize).unwrap();
        let candidates = decoder.decode(&tensor.view(), 640., 640., 0.0).unwrap();
        // NaN 锚点整个丢弃 (argmax 落在 NaN 上)
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_threshold_sweep_monotonic() {
        // 阈值从0→1扫描, 候选数单调不增
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let anchors: Vec<_> = (0..200)
            .map(|_| {
                let scores: Vec<f32> = (0..5).map(|_| rng.gen_range(0.0..1.0)).collect();
                (
                    [
                        rng.gen_range(0.0..1.0),
                        rng.gen_range(0.0..1.0),
                        rng.gen_range(0.0..0.5),
                        rng.gen_range(0.0..0.5),
                    ],
                    scores,
                )
            })
            .collect();
        let tensor = build_tensor(5, anchors);
        let decoder = TensorDecoder::new(5, BoxEncoding::CenterSize).unwrap();

        let mut last = usize::MAX;
        for step in 0..=10 {
            let conf = step as f32 / 10.0;
            let count = decoder.decode(&tensor.view(), 640., 640., conf).unwrap().len();
            assert!(count <= last);
            last = count;
        }
    }

    #[test]
    fn test_decode_is_deterministic() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let anchors: Vec<_> = (0..100)
            .map(|_| {
                let scores: Vec<f32> = (0..3).map(|_| rng.gen_range(0.0..1.0)).collect();
                ([0.5, 0.5, 0.1, 0.1], scores)
            })
            .collect();
        let tensor = build_tensor(3, anchors);
        let decoder = TensorDecoder::new(3, BoxEncoding::CenterSize).unwrap();
        let a = decoder.decode(&tensor.view(), 640., 640., 0.5).unwrap();
        let b = decoder.decode(&tensor.view(), 640., 640., 0.5).unwrap();
        assert_eq!(a, b);
    }
}
