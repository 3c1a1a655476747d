//! GPU kernels using WGPU.
//!
//! This module runs the convolution and pooling kernels as WGSL compute shaders.
//! It owns the GPU context, compiles every shader once (via `lazy_static`), and
//! provides the buffer primitives device tensors are built on: upload, download
//! and ranged copies.
//!
//! Unlike a round-trip offload, results stay on the GPU: a kernel writes into a
//! fresh storage buffer that becomes the output [`DeviceTensor`]. Submissions are
//! not awaited here; the first download of a buffer waits for the queue.
//!
//! Every shader takes a 32-byte uniform of eight `u32` dimensions at binding 0,
//! its read-only inputs at the following bindings, and its output last.

use super::{ConvGeometry, PoolGeometry};
use crate::device::{DeviceTensor, Storage};
use crate::error::Result;
use crate::pooling::PoolMode;
use crate::tensors::Float;
use briny::prelude::*;
use wgpu::util::DeviceExt;

const CONV1D: &str = include_str!("shaders/conv1d.wgsl");
const GRAD_WEIGHTS: &str = include_str!("shaders/grad_weights.wgsl");
const GRAD_INPUT: &str = include_str!("shaders/grad_input.wgsl");
const POOL_FORWARD: &str = include_str!("shaders/pool_forward.wgsl");
const POOL_BACKWARD: &str = include_str!("shaders/pool_backward.wgsl");
const MULTIPLY: &str = include_str!("shaders/multiply.wgsl");
const SCALE: &str = include_str!("shaders/scale.wgsl");

const WORKGROUP_SIZE: u32 = 64;
const MAX_WORKGROUPS_PER_DIM: u32 = 65_535;

/// Basic wrapper for common GPU errors.
#[derive(Debug)]
pub enum GpuError {
    /// An error in requesting the adapter.
    Adapter(wgpu::RequestAdapterError),
    /// An error in requesting the GPU (device).
    Device(wgpu::RequestDeviceError),
    /// Mapping a staging buffer for readback failed.
    BufferMap(wgpu::BufferAsyncError),
    /// Waiting on the queue failed.
    Poll(wgpu::PollError),
    /// A pipeline was rejected by the device.
    Pipeline(String),
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::Adapter(e) => write!(f, "Adapter error: {e}"),
            GpuError::Device(e) => write!(f, "Device error: {e}"),
            GpuError::BufferMap(e) => write!(f, "Buffer map error: {e}"),
            GpuError::Poll(e) => write!(f, "Poll error: {e}"),
            GpuError::Pipeline(e) => write!(f, "Pipeline error: {e}"),
        }
    }
}

/// Wrapper for a `GpuError` or `ValidationError` depending on how it fails.
#[derive(Debug)]
pub enum GpuFailureKind {
    /// An error resulting from the GPU.
    Gpu(GpuError),
    /// A shader source failed validation.
    Validation(ValidationError),
}

impl std::fmt::Display for GpuFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuFailureKind::Gpu(err) => write!(f, "GPU error: {err}"),
            GpuFailureKind::Validation(err) => write!(f, "Validation error: {err}"),
        }
    }
}

/// A type of error closely related to the GPU.
#[derive(Debug)]
pub struct GpuFailure {
    /// The optional type of failure that occurred.
    pub kind: Option<GpuFailureKind>,
    /// The optional message explaining the failure.
    pub message: Option<String>,
}

impl From<GpuError> for GpuFailure {
    fn from(kind: GpuError) -> Self {
        Self {
            kind: Some(GpuFailureKind::Gpu(kind)),
            message: None,
        }
    }
}

impl From<ValidationError> for GpuFailure {
    fn from(kind: ValidationError) -> Self {
        Self {
            kind: Some(GpuFailureKind::Validation(kind)),
            message: None,
        }
    }
}

impl From<&str> for GpuFailure {
    fn from(msg: &str) -> Self {
        Self {
            kind: None,
            message: Some(msg.to_string()),
        }
    }
}

impl From<String> for GpuFailure {
    fn from(msg: String) -> Self {
        Self {
            kind: None,
            message: Some(msg),
        }
    }
}

impl std::fmt::Display for GpuFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let Some(kind) = &self.kind {
            write!(f, "GPU failure: {kind}")
        } else if let Some(msg) = &self.message {
            write!(f, "GPU failure: {msg}")
        } else {
            write!(f, "Unknown GPU failure")
        }
    }
}

impl std::error::Error for GpuFailure {}

/// Holds the WGPU device and queue used for executing compute pipelines.
///
/// Initialized once globally and reused for all operations via `lazy_static`.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// A queue for information related to the device.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Selects the default adapter and creates a device + queue.
    ///
    /// Uses `pollster::block_on` to synchronously wait for the async WGPU calls.
    pub fn new() -> core::result::Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(GpuError::Adapter)?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("seqconv"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(GpuError::Device)?;

        log::debug!("wgpu context ready: {:?}", adapter.get_info().name);
        Ok(Self { device, queue })
    }
}

/// Secure wrapper for WGSL source code.
pub struct WgslSource<'a>(pub &'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        let src = self.0;

        if src.len() > 65536 || !src.contains("fn main") {
            return Err(ValidationError);
        }
        if src.contains("import") || src.contains("#include") {
            return Err(ValidationError);
        }
        let forbidden = ["asm", "unsafe", "ptr", "std::"];
        if forbidden.iter().any(|bad| src.contains(bad)) {
            return Err(ValidationError);
        }

        Ok(())
    }
}

/// A compiled compute pipeline and the layout of its bindings.
struct Kernel {
    label: &'static str,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl Kernel {
    /// Validates and compiles `source`, which reads `n_inputs` storage buffers.
    fn new(
        ctx: &GpuContext,
        label: &'static str,
        source: &str,
        n_inputs: u32,
    ) -> core::result::Result<Self, GpuFailure> {
        WgslSource(source).validate()?;
        let device = &ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        entries.extend((1..=n_inputs).map(|binding| storage(binding, true)));
        entries.push(storage(n_inputs + 1, false));

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::Pipeline(err.to_string()).into());
        }
        Ok(Self {
            label,
            layout,
            pipeline,
        })
    }
}

struct Kernels {
    conv1d: Kernel,
    grad_weights: Kernel,
    grad_input: Kernel,
    pool_forward: Kernel,
    pool_backward: Kernel,
    multiply: Kernel,
    scale: Kernel,
}

impl Kernels {
    fn new(ctx: &GpuContext) -> core::result::Result<Self, GpuFailure> {
        Ok(Self {
            conv1d: Kernel::new(ctx, "conv1d", CONV1D, 2)?,
            grad_weights: Kernel::new(ctx, "grad_weights", GRAD_WEIGHTS, 2)?,
            grad_input: Kernel::new(ctx, "grad_input", GRAD_INPUT, 2)?,
            pool_forward: Kernel::new(ctx, "pool_forward", POOL_FORWARD, 1)?,
            pool_backward: Kernel::new(ctx, "pool_backward", POOL_BACKWARD, 3)?,
            multiply: Kernel::new(ctx, "multiply", MULTIPLY, 2)?,
            scale: Kernel::new(ctx, "scale", SCALE, 1)?,
        })
    }
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: core::result::Result<GpuContext, String> =
        GpuContext::new().map_err(|e| e.to_string());
    static ref KERNELS: core::result::Result<Kernels, String> = match &*GPU_CONTEXT {
        Ok(ctx) => Kernels::new(ctx).map_err(|e| e.to_string()),
        Err(e) => Err(e.clone()),
    };
}

/// The process-wide GPU context, initialised on first use.
pub fn context() -> core::result::Result<&'static GpuContext, GpuFailure> {
    GPU_CONTEXT.as_ref().map_err(|e| GpuFailure::from(e.as_str()))
}

fn kernels() -> core::result::Result<&'static Kernels, GpuFailure> {
    KERNELS.as_ref().map_err(|e| GpuFailure::from(e.as_str()))
}

fn dim(value: usize) -> core::result::Result<u32, GpuFailure> {
    u32::try_from(value).map_err(|_| GpuFailure::from(format!("dimension {value} exceeds u32")))
}

fn byte_len(len: usize) -> u64 {
    // wgpu rejects zero-sized storage bindings
    (len.max(1) * core::mem::size_of::<f32>()) as u64
}

const BUFFER_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Copies `values` into a new storage buffer.
pub(crate) fn upload(values: &[f32]) -> core::result::Result<wgpu::Buffer, GpuFailure> {
    let ctx = context()?;
    if values.is_empty() {
        return Ok(ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("empty"),
            size: byte_len(0),
            usage: BUFFER_USAGE,
            mapped_at_creation: false,
        }));
    }
    Ok(ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("upload"),
            contents: bytemuck::cast_slice(values),
            usage: BUFFER_USAGE,
        }))
}

/// Reads the first `len` values of `buffer` back to the host, waiting for the queue.
pub(crate) fn download(
    buffer: &wgpu::Buffer,
    len: usize,
) -> core::result::Result<Vec<f32>, GpuFailure> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let ctx = context()?;
    let size = byte_len(len);

    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("download"),
        });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    ctx.queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device
        .poll(wgpu::PollType::Wait)
        .map_err(GpuError::Poll)?;
    rx.recv()
        .map_err(|_| GpuFailure::from("buffer map callback was dropped"))?
        .map_err(GpuError::BufferMap)?;

    let data = slice.get_mapped_range();
    let values = data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    drop(data);
    staging.unmap();

    Ok(values)
}

/// Copies `len` values starting at element `start` into a new buffer.
pub(crate) fn copy_range(
    buffer: &wgpu::Buffer,
    start: usize,
    len: usize,
) -> core::result::Result<wgpu::Buffer, GpuFailure> {
    let ctx = context()?;
    let copy = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("slice"),
        size: byte_len(len),
        usage: BUFFER_USAGE,
        mapped_at_creation: false,
    });
    if len > 0 {
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("slice"),
            });
        encoder.copy_buffer_to_buffer(buffer, (start * 4) as u64, &copy, 0, (len * 4) as u64);
        ctx.queue.submit(Some(encoder.finish()));
    }
    Ok(copy)
}

/// Encodes and submits one dispatch of `kernel`, returning its output buffer.
fn launch(
    kernel: &Kernel,
    dims: [u32; 8],
    inputs: &[&wgpu::Buffer],
    len: usize,
) -> core::result::Result<wgpu::Buffer, GpuFailure> {
    let ctx = context()?;
    let device = &ctx.device;

    let dims_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("dims"),
        contents: bytemuck::cast_slice(&dims),
        usage: wgpu::BufferUsages::UNIFORM,
    });
    let output = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(kernel.label),
        size: byte_len(len),
        usage: BUFFER_USAGE,
        mapped_at_creation: false,
    });

    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: dims_buffer.as_entire_binding(),
    }];
    for (binding, buffer) in (1u32..).zip(inputs) {
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: buffer.as_entire_binding(),
        });
    }
    entries.push(wgpu::BindGroupEntry {
        binding: dim(inputs.len() + 1)?,
        resource: output.as_entire_binding(),
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(kernel.label),
        layout: &kernel.layout,
        entries: &entries,
    });

    let groups = dim(len)?.div_ceil(WORKGROUP_SIZE);
    let (x, y) = if groups > MAX_WORKGROUPS_PER_DIM {
        (MAX_WORKGROUPS_PER_DIM, groups.div_ceil(MAX_WORKGROUPS_PER_DIM))
    } else {
        (groups, 1)
    };

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some(kernel.label),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&kernel.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, 1);
    }
    ctx.queue.submit(Some(encoder.finish()));
    log::trace!("{}: dispatched {x}x{y} workgroups", kernel.label);

    Ok(output)
}

/// Runs `select(kernels)` over `inputs` into a new device tensor of `shape`.
///
/// Returns `Ok(None)` when an input is not in GPU storage (an `f64` tensor, or one
/// created on another device); the caller then uses the CPU kernel.
fn run<T: Float>(
    select: impl FnOnce(&'static Kernels) -> &'static Kernel,
    dims: [u32; 8],
    inputs: &[&DeviceTensor<T>],
    shape: Vec<usize>,
) -> Result<Option<DeviceTensor<T>>> {
    let Some(buffers) = inputs
        .iter()
        .map(|t| t.wgpu_buffer())
        .collect::<Option<Vec<_>>>()
    else {
        return Ok(None);
    };
    let len: usize = shape.iter().product();
    let Some(first) = inputs.first() else {
        return Ok(None);
    };
    if len == 0 {
        return Ok(None);
    }

    let device = first.device();
    let allocation = device
        .allocator()
        .allocate(len * core::mem::size_of::<T>())?;
    let buffer = launch(select(kernels()?), dims, &buffers, len)?;
    Ok(Some(DeviceTensor::from_parts(
        device.clone(),
        shape,
        Storage::Wgpu(buffer),
        allocation,
    )))
}

fn conv_dims(g: &ConvGeometry, total: usize) -> core::result::Result<[u32; 8], GpuFailure> {
    Ok([
        dim(g.n_rows)?,
        dim(g.width)?,
        dim(g.n_filters)?,
        dim(g.filter_width)?,
        dim(g.stride)?,
        dim(g.out_width())?,
        dim(g.pad())?,
        dim(total)?,
    ])
}

fn pool_dims(
    g: &PoolGeometry,
    mode: PoolMode,
    total: usize,
) -> core::result::Result<[u32; 8], GpuFailure> {
    let mode = match mode {
        PoolMode::Max => 0,
        PoolMode::Avg => 1,
    };
    Ok([
        dim(g.rows)?,
        dim(g.width)?,
        dim(g.pool)?,
        dim(g.out_width())?,
        mode,
        dim(total)?,
        0,
        0,
    ])
}

pub(crate) fn conv1d<T: Float>(
    input: &DeviceTensor<T>,
    filters: &DeviceTensor<T>,
    g: &ConvGeometry,
) -> Result<Option<DeviceTensor<T>>> {
    let shape = g.output_shape();
    let dims = conv_dims(g, shape.iter().product())?;
    run(|k| &k.conv1d, dims, &[input, filters], shape)
}

pub(crate) fn conv1d_grad_weights<T: Float>(
    input: &DeviceTensor<T>,
    df_output: &DeviceTensor<T>,
    g: &ConvGeometry,
) -> Result<Option<DeviceTensor<T>>> {
    let shape = vec![g.n_filters, g.filter_width];
    let dims = conv_dims(g, g.n_filters * g.filter_width)?;
    run(|k| &k.grad_weights, dims, &[input, df_output], shape)
}

pub(crate) fn conv1d_grad_input<T: Float>(
    filters: &DeviceTensor<T>,
    df_output: &DeviceTensor<T>,
    g: &ConvGeometry,
) -> Result<Option<DeviceTensor<T>>> {
    let shape = vec![g.n_rows, g.width];
    let dims = conv_dims(g, g.n_rows * g.width)?;
    run(|k| &k.grad_input, dims, &[filters, df_output], shape)
}

pub(crate) fn pool_forward<T: Float>(
    input: &DeviceTensor<T>,
    g: &PoolGeometry,
    mode: PoolMode,
    shape: Vec<usize>,
) -> Result<Option<DeviceTensor<T>>> {
    let dims = pool_dims(g, mode, g.rows * g.out_width())?;
    run(|k| &k.pool_forward, dims, &[input], shape)
}

pub(crate) fn pool_backward<T: Float>(
    input: &DeviceTensor<T>,
    pooled: &DeviceTensor<T>,
    df_output: &DeviceTensor<T>,
    g: &PoolGeometry,
    mode: PoolMode,
) -> Result<Option<DeviceTensor<T>>> {
    let dims = pool_dims(g, mode, g.rows * g.width)?;
    let shape = input.shape().to_vec();
    run(|k| &k.pool_backward, dims, &[input, pooled, df_output], shape)
}

pub(crate) fn multiply<T: Float>(
    a: &DeviceTensor<T>,
    b: &DeviceTensor<T>,
) -> Result<Option<DeviceTensor<T>>> {
    let dims = [dim(a.len())?, 0, 0, 0, 0, 0, 0, 0];
    run(|k| &k.multiply, dims, &[a, b], a.shape().to_vec())
}

pub(crate) fn scale<T: Float>(a: &DeviceTensor<T>, factor: f32) -> Result<Option<DeviceTensor<T>>> {
    let dims = [dim(a.len())?, factor.to_bits(), 0, 0, 0, 0, 0, 0];
    run(|k| &k.scale, dims, &[a], a.shape().to_vec())
}
