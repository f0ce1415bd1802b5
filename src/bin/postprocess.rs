// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 张量文件后处理演示
// 读取 f32 little-endian 原始输出张量 → 检测管线 → 文本/JSON结果

use anyhow::Context;
use clap::Parser;
use ndarray::{Array, IxDyn};
use std::time::Instant;

use yolov9_rs::{Args, SessionConfig, Yolo};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 配置: 文件优先, 否则取命令行参数
    let config = match &args.config {
        Some(path) => SessionConfig::load(path),
        None => SessionConfig::from(&args),
    };

    println!(
        "🚀 检测后处理: conf={} iou={} nc={} encoding={:?} backend={}",
        config.conf_threshold,
        config.iou_threshold,
        config.num_classes,
        config.box_encoding,
        if config.use_gpu { "gpu" } else { "cpu" },
    );

    // 读取张量文件 [1, 4+nc, anchors]
    let t_load = Instant::now();
    let attributes = 4 + config.num_classes;
    let bytes = std::fs::read(&args.tensor)
        .with_context(|| format!("failed to read tensor file {}", args.tensor))?;
    let expected_bytes = attributes * args.anchors * 4;
    anyhow::ensure!(
        bytes.len() == expected_bytes,
        "tensor file is {} bytes, expected {} ([1, {}, {}] as f32)",
        bytes.len(),
        expected_bytes,
        attributes,
        args.anchors,
    );
    let data: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let tensor = Array::from_shape_vec(IxDyn(&[1, attributes, args.anchors]), data)
        .context("tensor shape mismatch")?;
    if args.profile {
        println!("[Tensor Load]: {:?}", t_load.elapsed());
    }

    let mut yolo = Yolo::new(&config).context("failed to build detection pipeline")?;
    yolo.set_profile(args.profile);

    let t_predict = Instant::now();
    let detections = yolo
        .predict(&tensor.view(), args.width, args.height)
        .context("prediction failed")?;
    if args.profile {
        println!("[Predict]: {:?}", t_predict.elapsed());
    }

    if args.json {
        let items: Vec<_> = detections
            .iter()
            .map(|d| {
                serde_json::json!({
                    "class_index": d.class_index,
                    "class_name": d.class_name,
                    "score": d.score,
                    "box": {
                        "xmin": d.bbox.xmin(),
                        "ymin": d.bbox.ymin(),
                        "width": d.bbox.width(),
                        "height": d.bbox.height(),
                    },
                    "color": [d.color.r, d.color.g, d.color.b, d.color.a],
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        println!("🎯 检测到 {} 个目标", detections.len());
        for d in &detections {
            println!(
                "  {:<16} {:.3}  ({:.1}, {:.1}) {:.1}x{:.1}",
                d.class_name,
                d.score,
                d.bbox.xmin(),
                d.bbox.ymin(),
                d.bbox.width(),
                d.bbox.height(),
            );
        }
    }

    Ok(())
}
