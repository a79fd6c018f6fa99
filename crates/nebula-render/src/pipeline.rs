//! Terrain rendering pipeline with vertex-shader LOD morphing.

use bytemuck::{Pod, Zeroable};
use std::num::NonZeroU64;

use nebula_terrain::TerrainSettings;

use crate::draw::DrawUniform;

/// Camera and grid parameters shared by every terrain draw.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct TerrainCameraUniform {
    pub view_proj: [[f32; 4]; 4], // 64 bytes, mat4x4
    /// x: grid scale, y: grid base, z: min height, w: height range.
    pub grid: [f32; 4],
}

static_assertions::const_assert_eq!(std::mem::size_of::<TerrainCameraUniform>(), 80);

impl TerrainCameraUniform {
    pub fn new(view_proj: glam::Mat4, settings: &TerrainSettings, height_range: (f32, f32)) -> Self {
        let (lo, hi) = height_range;
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            grid: [settings.grid_scale(), settings.grid_base(), lo, (hi - lo).max(1e-3)],
        }
    }
}

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 2] = [
    wgpu::VertexAttribute {
        offset: 0,
        shader_location: 0,
        format: wgpu::VertexFormat::Uint16x2,
    },
    wgpu::VertexAttribute {
        offset: 4,
        shader_location: 1,
        format: wgpu::VertexFormat::Float32,
    },
];

const DELTA_ATTRIBUTES: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    offset: 0,
    shader_location: 2,
    format: wgpu::VertexFormat::Float32x2,
}];

/// Slot 0: packed grid position and height.
pub const POSITION_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: 8,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &POSITION_ATTRIBUTES,
};

/// Slot 1: morph delta and elimination threshold.
pub const DELTA_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: 8,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &DELTA_ATTRIBUTES,
};

/// Terrain index buffers describe one strip per draw, skirts included.
pub fn terrain_primitive_state() -> wgpu::PrimitiveState {
    wgpu::PrimitiveState {
        topology: wgpu::PrimitiveTopology::TriangleStrip,
        strip_index_format: Some(wgpu::IndexFormat::Uint32),
        front_face: wgpu::FrontFace::Ccw,
        // Strip winding flips at every row turn.
        cull_mode: None,
        unclipped_depth: false,
        polygon_mode: wgpu::PolygonMode::Fill,
        conservative: false,
    }
}

pub struct TerrainPipeline {
    pub pipeline: wgpu::RenderPipeline,
    pub camera_bind_group_layout: wgpu::BindGroupLayout,
    pub draw_bind_group_layout: wgpu::BindGroupLayout,
}

impl TerrainPipeline {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        depth_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("terrain-shader"),
            source: wgpu::ShaderSource::Wgsl(TERRAIN_SHADER_SOURCE.into()),
        });

        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("terrain-camera-bind-group-layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(80), // TerrainCameraUniform
                    },
                    count: None,
                }],
            });

        let draw_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("terrain-draw-bind-group-layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(size_of::<DrawUniform>() as u64),
                    },
                    count: None,
                }],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("terrain-pipeline-layout"),
            bind_group_layouts: &[&camera_bind_group_layout, &draw_bind_group_layout],
            immediate_size: 0,
        });

        let depth_stencil = depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::GreaterEqual, // reverse-Z
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("terrain-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[POSITION_LAYOUT, DELTA_LAYOUT],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: terrain_primitive_state(),
            depth_stencil,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview_mask: None,
            cache: None,
        });

        Self {
            pipeline,
            camera_bind_group_layout,
            draw_bind_group_layout,
        }
    }
}

/// WGSL for XZ-aligned terrain. Vertices eliminated before the target LOD
/// slide toward the coarser surface by `transition`.
pub const TERRAIN_SHADER_SOURCE: &str = r#"
struct CameraUniform {
    view_proj: mat4x4<f32>,
    grid: vec4<f32>,
};

struct DrawUniform {
    origin: vec4<f32>,
    morph: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> camera: CameraUniform;

@group(1) @binding(0)
var<uniform> draw: DrawUniform;

struct VertexInput {
    @location(0) grid: vec2<u32>,
    @location(1) height: f32,
    @location(2) delta: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) shade: f32,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var height = in.height;
    if (in.delta.y < draw.morph.y) {
        height = height + in.delta.x * draw.morph.x;
    }
    let u = f32(in.grid.x) * camera.grid.x + camera.grid.y;
    let v = f32(in.grid.y) * camera.grid.x + camera.grid.y;
    let world = vec3<f32>(u, height, -v) + draw.origin.xyz;

    var out: VertexOutput;
    out.clip_position = camera.view_proj * vec4<f32>(world, 1.0);
    out.shade = clamp((height - camera.grid.z) / camera.grid.w, 0.0, 1.0);
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let low = vec3<f32>(0.22, 0.35, 0.16);
    let high = vec3<f32>(0.85, 0.84, 0.80);
    return vec4<f32>(mix(low, high, in.shade), 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn test_device() -> Option<wgpu::Device> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::default(),
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok()?;
            let (device, _queue) = adapter
                .request_device(&wgpu::DeviceDescriptor::default())
                .await
                .ok()?;
            Some(device)
        })
    }

    #[test]
    fn test_pipeline_creation_succeeds() {
        let Some(device) = test_device() else {
            return;
        };
        let _pipeline = TerrainPipeline::new(
            &device,
            wgpu::TextureFormat::Bgra8UnormSrgb,
            Some(wgpu::TextureFormat::Depth32Float),
        );
    }

    /// Layouts must agree with the packed terrain vertex structs.
    #[test]
    fn test_layouts_match_vertex_structs() {
        assert_eq!(
            POSITION_LAYOUT.array_stride as usize,
            size_of::<nebula_terrain::PositionVertex>()
        );
        assert_eq!(
            DELTA_LAYOUT.array_stride as usize,
            size_of::<nebula_terrain::DeltaVertex>()
        );
        assert_eq!(POSITION_LAYOUT.attributes[1].offset, 4, "height follows the grid pair");
        assert_eq!(DELTA_LAYOUT.attributes[0].shader_location, 2);
    }

    #[test]
    fn test_strip_topology() {
        let state = terrain_primitive_state();
        assert_eq!(state.topology, wgpu::PrimitiveTopology::TriangleStrip);
        assert_eq!(state.strip_index_format, Some(wgpu::IndexFormat::Uint32));
    }

    #[test]
    fn test_shader_entry_points() {
        assert!(TERRAIN_SHADER_SOURCE.contains("fn vs_main"));
        assert!(TERRAIN_SHADER_SOURCE.contains("fn fs_main"));
    }

    #[test]
    fn test_camera_uniform_grid() {
        let settings = TerrainSettings::default();
        let u = TerrainCameraUniform::new(glam::Mat4::IDENTITY, &settings, (-10.0, 30.0));
        assert_eq!(u.grid, [settings.grid_scale(), -6000.0, -10.0, 40.0]);
    }
}
