/// GPU加速的检测后处理 (使用wgpu)
/// 解码内核逐锚点并行过滤, 原子计数器协调输出槽位; NMS内核逐轮贪心抑制
use wgpu::util::DeviceExt;

use crate::detection::nms::sort_for_suppression;
use crate::detection::types::{Bbox, BoxEncoding, CandidateDetection};
use crate::error::DetectError;

/// 解码内核的工作组大小
const WORKGROUP_SIZE: u32 = 256;

/// GPU后处理上下文
/// 设备/队列/管线在构造时创建一次, 帧间复用
pub struct GpuPostProcessor {
    device: wgpu::Device,
    queue: wgpu::Queue,
    decode_pipeline: wgpu::ComputePipeline,
    nms_pipeline: wgpu::ComputePipeline,
    // 帧间缓冲区缓存: 仅当锚点数不变时复用, 尺寸变化立即释放重建
    frame_buffers: Option<FrameBuffers>,
}

/// 一帧处理所需的设备缓冲区, 容量始终等于当前帧锚点数
struct FrameBuffers {
    num_anchors: usize,
    attributes: usize,
    tensor: wgpu::Buffer,
    boxes: wgpu::Buffer,
    classes: wgpu::Buffer,
    scores: wgpu::Buffer,
    // 锚点序号随候选一起压缩输出: 原子认领的槽位顺序不确定,
    // 并列分数的决胜键必须穿过并行路径才能与顺序后端产出同一集合
    anchors: wgpu::Buffer,
    counter: wgpu::Buffer,
}

impl GpuPostProcessor {
    /// 创建GPU上下文: 选择适配器、编译内核、建立管线
    ///
    /// 适配器或内核不可用是配置错误 (快速失败, 管线不可用直至修复)。
    /// 注意: 使用pollster::block_on内部处理异步,外部是同步调用
    pub fn new() -> Result<Self, DetectError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| DetectError::Configuration("no suitable GPU adapter".into()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Detection Postprocess Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .map_err(|e| DetectError::Configuration(format!("device request failed: {e}")))?;

        let decode_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Decode Shader"),
            source: wgpu::ShaderSource::Wgsl(DECODE_SHADER.into()),
        });
        let nms_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("NMS Shader"),
            source: wgpu::ShaderSource::Wgsl(NMS_SHADER.into()),
        });

        let decode_pipeline = create_decode_pipeline(&device, &decode_module);
        let nms_pipeline = create_nms_pipeline(&device, &nms_module);

        Ok(Self {
            device,
            queue,
            decode_pipeline,
            nms_pipeline,
            frame_buffers: None,
        })
    }

    /// 执行一帧的解码+NMS, 返回保留的候选集合
    ///
    /// 与CPU路径 (TensorDecoder + class_wise_nms) 对同一输入产出同一集合。
    /// 调用阻塞直到设备结果可读 (同步回读), 期间缓冲区归本对象独占。
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &mut self,
        tensor: &[f32],
        num_anchors: usize,
        num_classes: usize,
        encoding: BoxEncoding,
        image_width: f32,
        image_height: f32,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Vec<CandidateDetection>, DetectError> {
        // 零锚点: 合法空结果, 不派发空内核
        if num_anchors == 0 {
            return Ok(Vec::new());
        }

        let attributes = 4 + num_classes;
        self.ensure_frame_buffers(num_anchors, attributes)?;
        let candidates = self.dispatch_decode(
            tensor,
            num_anchors,
            num_classes,
            encoding,
            image_width,
            image_height,
            conf_threshold,
        )?;
        if candidates.is_empty() {
            return Ok(candidates);
        }

        self.dispatch_nms(candidates, iou_threshold)
    }

    /// 缓冲区生命周期: 锚点数不变时跨帧复用, 变化时整组释放重建,
    /// 容量永远等于当前帧的锚点数, 绝不沿用陈旧尺寸
    fn ensure_frame_buffers(
        &mut self,
        num_anchors: usize,
        attributes: usize,
    ) -> Result<(), DetectError> {
        if let Some(buffers) = &self.frame_buffers {
            if buffers.num_anchors == num_anchors && buffers.attributes == attributes {
                return Ok(());
            }
            // 尺寸变化: 先释放旧缓冲区再分配 (drop 即归还分配器)
            self.frame_buffers = None;
        }

        let tensor_bytes = (num_anchors * attributes * 4) as u64;
        let limit = self.device.limits().max_storage_buffer_binding_size as u64;
        if tensor_bytes > limit {
            return Err(DetectError::ResourceExhaustion(format!(
                "tensor buffer {} bytes exceeds device limit {}",
                tensor_bytes, limit
            )));
        }

        let device = &self.device;
        let storage = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };

        self.frame_buffers = Some(FrameBuffers {
            num_anchors,
            attributes,
            tensor: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Raw Output Tensor"),
                size: tensor_bytes,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            boxes: storage("Candidate Boxes", (num_anchors * 16) as u64),
            classes: storage("Candidate Classes", (num_anchors * 4) as u64),
            scores: storage("Candidate Scores", (num_anchors * 4) as u64),
            anchors: storage("Candidate Anchor Indices", (num_anchors * 4) as u64),
            counter: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Valid Detection Counter"),
                size: 4,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
        });
        Ok(())
    }

    fn dispatch_decode(
        &mut self,
        tensor: &[f32],
        num_anchors: usize,
        num_classes: usize,
        encoding: BoxEncoding,
        image_width: f32,
        image_height: f32,
        conf_threshold: f32,
    ) -> Result<Vec<CandidateDetection>, DetectError> {
        let buffers = self
            .frame_buffers
            .as_ref()
            .ok_or_else(|| DetectError::Configuration("frame buffers not allocated".into()))?;

        // 上传张量, 计数器清零
        self.queue
            .write_buffer(&buffers.tensor, 0, bytemuck::cast_slice(tensor));
        self.queue
            .write_buffer(&buffers.counter, 0, bytemuck::bytes_of(&0u32));

        let params = DecodeParams {
            num_anchors: num_anchors as u32,
            num_classes: num_classes as u32,
            encoding: match encoding {
                BoxEncoding::CenterSize => 0,
                BoxEncoding::CornerSize => 1,
            },
            _pad: 0,
            image_width,
            image_height,
            conf_threshold,
            _pad2: 0.0,
        };
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Decode Params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let bind_group_layout = self.decode_pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Decode Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                bind(0, &params_buffer),
                bind(1, &buffers.tensor),
                bind(2, &buffers.boxes),
                bind(3, &buffers.classes),
                bind(4, &buffers.scores),
                bind(5, &buffers.anchors),
                bind(6, &buffers.counter),
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Decode Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Decode Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.decode_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                (num_anchors as u32 + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE,
                1,
                1,
            );
        }
        self.queue.submit(Some(encoder.finish()));

        // 同步回读计数器, 据此确定三个结果缓冲区的CPU侧回读尺寸
        let count_bytes = self.readback(&buffers.counter, 4)?;
        let valid_count = u32::from_le_bytes([
            count_bytes[0],
            count_bytes[1],
            count_bytes[2],
            count_bytes[3],
        ]) as usize;
        if valid_count == 0 {
            return Ok(Vec::new());
        }

        let box_bytes = self.readback(&buffers.boxes, (valid_count * 16) as u64)?;
        let class_bytes = self.readback(&buffers.classes, (valid_count * 4) as u64)?;
        let score_bytes = self.readback(&buffers.scores, (valid_count * 4) as u64)?;
        let anchor_bytes = self.readback(&buffers.anchors, (valid_count * 4) as u64)?;

        // pod_collect_to_vec: 回读的字节缓冲不保证4字节对齐
        let boxes: Vec<f32> = bytemuck::pod_collect_to_vec(&box_bytes);
        let classes: Vec<u32> = bytemuck::pod_collect_to_vec(&class_bytes);
        let scores: Vec<f32> = bytemuck::pod_collect_to_vec(&score_bytes);
        let anchors: Vec<u32> = bytemuck::pod_collect_to_vec(&anchor_bytes);

        let candidates = (0..valid_count)
            .map(|i| CandidateDetection {
                class_index: classes[i] as usize,
                score: scores[i],
                bbox: Bbox::new(
                    boxes[i * 4],
                    boxes[i * 4 + 1],
                    boxes[i * 4 + 2],
                    boxes[i * 4 + 3],
                ),
                anchor_index: anchors[i] as usize,
            })
            .collect();
        Ok(candidates)
    }

    /// NMS第二次派发: 候选在主机侧排好序 (分数降序, 并列按锚点序号),
    /// 内核单工作组逐轮推进, 线程只与序号更小且仍被选中的同类候选比较,
    /// 与顺序贪心算法产出同一选择集; 每线程只写自己的标志位, 无写竞争
    fn dispatch_nms(
        &self,
        mut candidates: Vec<CandidateDetection>,
        iou_threshold: f32,
    ) -> Result<Vec<CandidateDetection>, DetectError> {
        sort_for_suppression(&mut candidates);
        let n = candidates.len();

        let mut box_data = Vec::with_capacity(n * 4);
        let mut class_data = Vec::with_capacity(n);
        for c in &candidates {
            box_data.extend_from_slice(&[
                c.bbox.xmin(),
                c.bbox.ymin(),
                c.bbox.width(),
                c.bbox.height(),
            ]);
            class_data.push(c.class_index as u32);
        }

        let boxes_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("NMS Boxes"),
                contents: bytemuck::cast_slice(&box_data),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let classes_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("NMS Classes"),
                contents: bytemuck::cast_slice(&class_data),
                usage: wgpu::BufferUsages::STORAGE,
            });
        // 全部初始化为已选中, 内核只做清除
        let selected_init = vec![1u32; n];
        let selected_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("NMS Selected Flags"),
                contents: bytemuck::cast_slice(&selected_init),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            });
        let params = NmsParams {
            num_candidates: n as u32,
            iou_threshold,
            _pad0: 0,
            _pad1: 0,
        };
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("NMS Params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let bind_group_layout = self.nms_pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("NMS Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                bind(0, &params_buffer),
                bind(1, &boxes_buffer),
                bind(2, &classes_buffer),
                bind(3, &selected_buffer),
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("NMS Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("NMS Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.nms_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            // 单工作组: 轮次间的storageBarrier需要所有线程同组
            pass.dispatch_workgroups(1, 1, 1);
        }
        self.queue.submit(Some(encoder.finish()));

        let selected_bytes = self.readback(&selected_buffer, (n * 4) as u64)?;
        let selected: Vec<u32> = bytemuck::pod_collect_to_vec(&selected_bytes);

        Ok(candidates
            .into_iter()
            .zip(selected.iter())
            .filter(|(_, &keep)| keep == 1)
            .map(|(c, _)| c)
            .collect())
    }

    /// 同步回读: staging缓冲区拷贝 + map_async + 阻塞等待设备完成
    /// staging缓冲区本帧结束即释放, 释放后绝不再读
    fn readback(&self, src: &wgpu::Buffer, size: u64) -> Result<Vec<u8>, DetectError> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(rx)
            .map_err(|_| DetectError::ResourceExhaustion("readback channel dropped".into()))?
            .map_err(|e| DetectError::ResourceExhaustion(format!("buffer map failed: {e:?}")))?;

        let data = buffer_slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }
}

/// 绑定组条目辅助
fn bind(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

fn layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_decode_pipeline(
    device: &wgpu::Device,
    shader_module: &wgpu::ShaderModule,
) -> wgpu::ComputePipeline {
    use wgpu::BufferBindingType::{Storage, Uniform};
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Decode Bind Group Layout"),
        entries: &[
            layout_entry(0, Uniform),
            layout_entry(1, Storage { read_only: true }),
            layout_entry(2, Storage { read_only: false }),
            layout_entry(3, Storage { read_only: false }),
            layout_entry(4, Storage { read_only: false }),
            layout_entry(5, Storage { read_only: false }),
            layout_entry(6, Storage { read_only: false }),
        ],
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Decode Pipeline Layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("Decode Pipeline"),
        layout: Some(&pipeline_layout),
        module: shader_module,
        entry_point: "decode_candidates",
        cache: None,
        compilation_options: Default::default(),
    })
}

fn create_nms_pipeline(
    device: &wgpu::Device,
    shader_module: &wgpu::ShaderModule,
) -> wgpu::ComputePipeline {
    use wgpu::BufferBindingType::{Storage, Uniform};
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("NMS Bind Group Layout"),
        entries: &[
            layout_entry(0, Uniform),
            layout_entry(1, Storage { read_only: true }),
            layout_entry(2, Storage { read_only: true }),
            layout_entry(3, Storage { read_only: false }),
        ],
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("NMS Pipeline Layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("NMS Pipeline"),
        layout: Some(&pipeline_layout),
        module: shader_module,
        entry_point: "suppress_overlaps",
        cache: None,
        compilation_options: Default::default(),
    })
}

/// 解码内核参数 (需要16字节对齐)
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DecodeParams {
    num_anchors: u32,
    num_classes: u32,
    encoding: u32, // 0 = 中心点+宽高, 1 = 左上角+宽高
    _pad: u32,
    image_width: f32,
    image_height: f32,
    conf_threshold: f32,
    _pad2: f32,
}

/// NMS内核参数
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct NmsParams {
    num_candidates: u32,
    iou_threshold: f32,
    _pad0: u32,
    _pad1: u32,
}

/// WGSL解码内核
const DECODE_SHADER: &str = r#"
struct DecodeParams {
    num_anchors: u32,
    num_classes: u32,
    encoding: u32,
    _pad: u32,
    image_width: f32,
    image_height: f32,
    conf_threshold: f32,
    _pad2: f32,
}

@group(0) @binding(0) var<uniform> params: DecodeParams;
@group(0) @binding(1) var<storage, read> tensor: array<f32>;
@group(0) @binding(2) var<storage, read_write> out_boxes: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read_write> out_classes: array<u32>;
@group(0) @binding(4) var<storage, read_write> out_scores: array<f32>;
@group(0) @binding(5) var<storage, read_write> out_anchors: array<u32>;
@group(0) @binding(6) var<storage, read_write> valid_count: atomic<u32>;

// 属性主序布局: 属性a锚点i的值位于 a * num_anchors + i
fn attr(a: u32, i: u32) -> f32 {
    return tensor[a * params.num_anchors + i];
}

@compute @workgroup_size(256)
fn decode_candidates(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= params.num_anchors) {
        return;
    }

    // argmax, 同分保留较小类别序号
    var best_class = 0u;
    var best_score = attr(4u, i);
    for (var c = 1u; c < params.num_classes; c = c + 1u) {
        let s = attr(4u + c, i);
        if (s > best_score) {
            best_score = s;
            best_class = c;
        }
    }
    if (best_score < params.conf_threshold) {
        return;
    }

    var w = attr(2u, i);
    var h = attr(3u, i);
    var xmin: f32;
    var ymin: f32;
    if (params.encoding == 0u) {
        xmin = attr(0u, i) - w * 0.5;
        ymin = attr(1u, i) - h * 0.5;
    } else {
        xmin = attr(0u, i);
        ymin = attr(1u, i);
    }
    let px = clamp(xmin * params.image_width, 0.0, params.image_width);
    let py = clamp(ymin * params.image_height, 0.0, params.image_height);
    let pw = max(w * params.image_width, 0.0);
    let ph = max(h * params.image_height, 0.0);

    // 先原子认领槽位再写入: 预增量值就是本线程独占的输出下标,
    // 没有认领的固定下标写法会让并发线程互相覆盖
    let slot = atomicAdd(&valid_count, 1u);
    out_boxes[slot] = vec4<f32>(px, py, pw, ph);
    out_classes[slot] = best_class;
    out_scores[slot] = best_score;
    out_anchors[slot] = i;
}
"#;

/// WGSL NMS内核
const NMS_SHADER: &str = r#"
struct NmsParams {
    num_candidates: u32,
    iou_threshold: f32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> nms: NmsParams;
@group(0) @binding(1) var<storage, read> boxes: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> classes: array<u32>;
@group(0) @binding(3) var<storage, read_write> selected: array<u32>;

// box为 (xmin, ymin, w, h); 并集为0时IoU定义为0
fn iou(a: vec4<f32>, b: vec4<f32>) -> f32 {
    let iw = max(0.0, min(a.x + a.z, b.x + b.z) - max(a.x, b.x));
    let ih = max(0.0, min(a.y + a.w, b.y + b.w) - max(a.y, b.y));
    let inter = iw * ih;
    let uni = a.z * a.w + b.z * b.w - inter;
    if (uni <= 0.0) {
        return 0.0;
    }
    return inter / uni;
}

// 输入已按分数降序 (并列按锚点序号) 排序。
// 单工作组逐轮推进: 第r轮只拿仍被选中的第r个候选去抑制序号更大的同类候选,
// 轮次之间storageBarrier保证第r个标志位已定型 —— 与顺序贪心逐位等价。
// 每个线程只写自己负责的标志位, 不读其他线程本轮的写入, 无数据竞争。
@compute @workgroup_size(256)
fn suppress_overlaps(@builtin(local_invocation_id) lid: vec3<u32>) {
    let n = nms.num_candidates;
    for (var round = 0u; round < n; round = round + 1u) {
        storageBarrier();
        if (selected[round] == 1u) {
            var i = lid.x;
            loop {
                if (i >= n) {
                    break;
                }
                if (i > round && classes[i] == classes[round]
                    && iou(boxes[i], boxes[round]) > nms.iou_threshold) {
                    selected[i] = 0u;
                }
                i = i + 256u;
            }
        }
    }
}
"#;
