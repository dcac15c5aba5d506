use std::borrow::Cow;
use std::thread;

use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use tracing::{debug, warn};
use wgpu::naga::ShaderStage;

use crate::clock::TimeSample;
use crate::compile::compile_report;
use crate::handle::{CompileTicket, Frame, RendererHandle};
use crate::source::{wrap_shader, ShaderKind, VERTEX_SHADER_GLSL};

/// Configuration for one offscreen renderer instance.
#[derive(Debug, Clone, Copy)]
pub struct OffscreenOptions {
    /// Target size in physical pixels.
    pub width: u32,
    pub height: u32,
    /// Which channel program this handle compiles and runs.
    pub kind: ShaderKind,
}

impl Default for OffscreenOptions {
    fn default() -> Self {
        Self {
            width: 512,
            height: 256,
            kind: ShaderKind::Visual,
        }
    }
}

/// CPU copy of the classic-mode uniform block.
///
/// Field order and padding must match the `SessionParams` block declared in
/// `source.rs` (std140: two vec2s, two floats, an int, and explicit padding
/// to a 32-byte struct).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SessionUniforms {
    resolution: [f32; 2],
    mouse: [f32; 2],
    time: f32,
    sound: f32,
    frame: i32,
    _padding0: f32,
}

impl SessionUniforms {
    fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: [width as f32, height as f32],
            // No event-input target offscreen; park the cursor at the center.
            mouse: [0.5, 0.5],
            time: 0.0,
            sound: 0.0,
            frame: 0,
            _padding0: 0.0,
        }
    }
}

/// Render target plus the staging buffer used for pixel readback.
struct CaptureTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    staging: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    unpadded_bytes_per_row: u32,
}

impl CaptureTarget {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let unpadded_bytes_per_row = width * 4;
        let padded_bytes_per_row =
            align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offscreen staging"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            texture,
            view,
            staging,
            width,
            height,
            padded_bytes_per_row,
            unpadded_bytes_per_row,
        }
    }
}

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Headless renderer handle backed by wgpu.
///
/// Shader builds run on a worker thread and report through the caller's
/// [`CompileTicket`]; a failed build keeps the previously compiled program
/// so the channel never goes dark mid-edit.
pub struct OffscreenRenderer {
    _instance: wgpu::Instance,
    device: wgpu::Device,
    queue: wgpu::Queue,
    kind: ShaderKind,
    target: CaptureTarget,
    uniforms: SessionUniforms,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    backbuffer_bind_group: wgpu::BindGroup,
    pipeline_layout: wgpu::PipelineLayout,
    vertex_module: wgpu::ShaderModule,
    pipeline: Option<wgpu::RenderPipeline>,
    pending: Option<Receiver<wgpu::RenderPipeline>>,
    signal: f32,
    running: bool,
}

impl OffscreenRenderer {
    /// Acquires an adapter and device with no window surface attached and
    /// prepares the render target, uniform block, and placeholder
    /// backbuffer binding.
    pub fn new(options: OffscreenOptions) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a GPU adapter for offscreen rendering")?;

        let limits = adapter.limits();
        let max_dimension = limits.max_texture_dimension_2d;
        if options.width > max_dimension || options.height > max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max_dimension}, requested surface is {width}x{height}",
                width = options.width,
                height = options.height
            );
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("fraglive offscreen device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        debug!(
            adapter = %adapter.get_info().name,
            backend = ?adapter.get_info().backend,
            width = options.width,
            height = options.height,
            kind = ?options.kind,
            "created offscreen renderer"
        );

        let target = CaptureTarget::new(&device, options.width, options.height);
        let uniforms = SessionUniforms::new(target.width, target.height);

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("session uniforms"),
            size: std::mem::size_of::<SessionUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let (backbuffer_layout, backbuffer_bind_group) =
            create_backbuffer_placeholder(&device, &queue);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("offscreen pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &backbuffer_layout],
            push_constant_ranges: &[],
        });

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fullscreen triangle vertex"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
                stage: ShaderStage::Vertex,
                defines: &[],
            },
        });

        Ok(Self {
            _instance: instance,
            device,
            queue,
            kind: options.kind,
            target,
            uniforms,
            uniform_buffer,
            uniform_bind_group,
            backbuffer_bind_group,
            pipeline_layout,
            vertex_module,
            pipeline: None,
            pending: None,
            signal: 0.0,
            running: true,
        })
    }

    /// Swaps in a worker-built pipeline if one has landed.
    fn poll_pending(&mut self) {
        let Some(receiver) = self.pending.as_ref() else {
            return;
        };
        match receiver.try_recv() {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                self.pending = None;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                // Build failed; the report already went out via the ticket.
                self.pending = None;
            }
        }
    }

    fn update_uniforms(&mut self, sample: TimeSample) {
        self.uniforms.resolution = [self.target.width as f32, self.target.height as f32];
        self.uniforms.time = sample.seconds;
        self.uniforms.frame = sample.frame_index.min(i32::MAX as u64) as i32;
        self.uniforms.sound = self.signal;
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&self.uniforms));
    }

    fn encode_pass(&self, encoder: &mut wgpu::CommandEncoder, pipeline: &wgpu::RenderPipeline) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("offscreen pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.target.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.uniform_bind_group, &[]);
        pass.set_bind_group(1, &self.backbuffer_bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn read_back(&self) -> Result<Frame> {
        let slice = self.target.staging.slice(..);
        let (sender, receiver) = bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::Wait);
        receiver
            .recv()
            .context("staging map callback dropped")?
            .map_err(|err| anyhow!("failed to map staging buffer: {err}"))?;

        let mapped = slice.get_mapped_range();
        // Rows come back top-first; classic-mode coordinates put y = 0 at
        // the bottom, so reverse them while stripping the copy padding.
        let mut rgba =
            Vec::with_capacity((self.target.unpadded_bytes_per_row * self.target.height) as usize);
        for row in (0..self.target.height).rev() {
            let start = (row * self.target.padded_bytes_per_row) as usize;
            let end = start + self.target.unpadded_bytes_per_row as usize;
            rgba.extend_from_slice(&mapped[start..end]);
        }
        drop(mapped);
        self.target.staging.unmap();

        Ok(Frame {
            width: self.target.width,
            height: self.target.height,
            rgba,
        })
    }
}

impl RendererHandle for OffscreenRenderer {
    fn compile(&mut self, source: &str) -> CompileTicket {
        let (ticket, report_sender) = CompileTicket::pending();

        let kind = self.kind;
        let wrapped = wrap_shader(kind, source);
        let source = source.to_string();
        let device = self.device.clone();
        let pipeline_layout = self.pipeline_layout.clone();
        let vertex_module = self.vertex_module.clone();
        let (build_sender, build_receiver) = bounded(1);

        // A fresh compile supersedes any build still in flight; dropping the
        // old receiver makes the stale pipeline undeliverable.
        self.pending = Some(build_receiver);

        thread::spawn(move || {
            let report = compile_report(kind, &source);
            if !report.is_usable() {
                let _ = report_sender.send(report);
                return;
            }

            device.push_error_scope(wgpu::ErrorFilter::Validation);
            let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("channel fragment"),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Owned(wrapped),
                    stage: ShaderStage::Fragment,
                    defines: &[],
                },
            });
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("channel pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some("main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });

            match pollster::block_on(device.pop_error_scope()) {
                Some(error) => {
                    let _ = report_sender
                        .send(crate::handle::BuildReport::error(format!("{error}")));
                }
                None => {
                    let _ = build_sender.send(pipeline);
                    let _ = report_sender.send(report);
                }
            }
        });

        ticket
    }

    fn render_frame(&mut self, sample: TimeSample) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.poll_pending();
        let Some(pipeline) = self.pipeline.clone() else {
            return Ok(());
        };

        self.update_uniforms(sample);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("live encoder"),
            });
        self.encode_pass(&mut encoder, &pipeline);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn render_once(&mut self, sample: TimeSample) -> Result<Frame> {
        if !self.running {
            anyhow::bail!("renderer handle is stopped");
        }
        self.poll_pending();
        let Some(pipeline) = self.pipeline.clone() else {
            anyhow::bail!("no successfully compiled shader to render");
        };

        self.update_uniforms(sample);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("capture encoder"),
            });
        self.encode_pass(&mut encoder, &pipeline);
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.target.staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.target.padded_bytes_per_row),
                    rows_per_image: Some(self.target.height),
                },
            },
            wgpu::Extent3d {
                width: self.target.width,
                height: self.target.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        self.read_back()
    }

    fn set_signal(&mut self, value: f32) {
        self.signal = value;
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            warn!(width, height, "ignoring zero-sized resize request");
            return Ok(());
        }
        self.target = CaptureTarget::new(&self.device, width, height);
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
        self.pending = None;
    }
}

/// Builds the 1x1 black texture standing in for the backbuffer channel.
fn create_backbuffer_placeholder(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
) -> (wgpu::BindGroupLayout, wgpu::BindGroup) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("backbuffer placeholder"),
        size: wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &[0, 0, 0, 255],
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4),
            rows_per_image: Some(1),
        },
        wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor::default());

    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("backbuffer layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("backbuffer bind group"),
        layout: &layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&sampler),
            },
        ],
    });

    (layout, bind_group)
}
