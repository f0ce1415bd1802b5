//! 分类别非极大值抑制 (Class-wise Non-Max Suppression)
//!
//! 同类候选之间贪心去重,不同类别互不抑制。
//! 复杂度 O(n²)/类,n 是通过置信度阈值后的候选数 (几十量级,解码器已过滤)。

use std::collections::BTreeMap;

use crate::detection::types::CandidateDetection;

/// 组内排序: 分数降序,并列按原始锚点序号升序,保证跨运行可复现
pub(crate) fn sort_for_suppression(group: &mut [CandidateDetection]) {
    group.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.anchor_index.cmp(&b.anchor_index))
    });
}

/// 单组贪心NMS: 按序扫描,与所有已接受者的 IoU 均 ≤ 阈值才保留
fn suppress_group(mut group: Vec<CandidateDetection>, iou_threshold: f32) -> Vec<CandidateDetection> {
    sort_for_suppression(&mut group);

    let mut accepted: Vec<CandidateDetection> = Vec::with_capacity(group.len());
    for candidate in group {
        let overlaps = accepted
            .iter()
            .any(|kept| candidate.bbox.iou(&kept.bbox) > iou_threshold);
        if !overlaps {
            accepted.push(candidate);
        }
    }
    accepted
}

/// 分类别NMS: 按类别分组,组内独立抑制,再拼接所有组
///
/// 组内输出保持分数降序;跨类别的相对顺序不构成契约 (这里按类别序号升序拼接)。
pub fn class_wise_nms(
    candidates: Vec<CandidateDetection>,
    iou_threshold: f32,
) -> Vec<CandidateDetection> {
    let mut groups: BTreeMap<usize, Vec<CandidateDetection>> = BTreeMap::new();
    for candidate in candidates {
        groups.entry(candidate.class_index).or_default().push(candidate);
    }

    let mut result = Vec::new();
    for (_, group) in groups {
        result.extend(suppress_group(group, iou_threshold));
    }
    result
}
