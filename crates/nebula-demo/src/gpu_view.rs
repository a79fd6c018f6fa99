//! Offscreen wgpu rendering of the flythrough.

use glam::{Mat4, Vec3};
use nebula_render::{
    DrawUniformBuffer, TerrainCameraUniform, TerrainPipeline, WgpuTerrainAllocator, encode_draws,
};
use nebula_terrain::{DrawList, Terrain};
use wgpu::util::DeviceExt;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Offscreen colour and depth targets plus the terrain pipeline.
pub struct OffscreenView {
    pipeline: TerrainPipeline,
    uniforms: DrawUniformBuffer,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    color: wgpu::TextureView,
    depth: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl OffscreenView {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let pipeline = TerrainPipeline::new(device, TARGET_FORMAT, Some(DEPTH_FORMAT));
        let uniforms = DrawUniformBuffer::new(device, &pipeline, 64);

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("terrain-camera"),
            contents: bytemuck::bytes_of(&TerrainCameraUniform {
                view_proj: Mat4::IDENTITY.to_cols_array_2d(),
                grid: [0.0; 4],
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("terrain-camera-bind-group"),
            layout: &pipeline.camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let color = create_target(device, "terrain-color", width, height, TARGET_FORMAT);
        let depth = create_target(device, "terrain-depth", width, height, DEPTH_FORMAT);

        Self {
            pipeline,
            uniforms,
            camera_buffer,
            camera_bind_group,
            color,
            depth,
            width,
            height,
        }
    }

    /// Reverse-Z perspective looking from `eye` at `target`.
    pub fn view_proj(&self, fov_y_radians: f32, far: f32, eye: Vec3, target: Vec3) -> Mat4 {
        let aspect = self.width as f32 / self.height.max(1) as f32;
        // Swapped near/far for reverse-Z.
        let proj = Mat4::perspective_rh(fov_y_radians, aspect, far, 1.0);
        proj * Mat4::look_at_rh(eye, target, Vec3::Y)
    }

    /// Encode and submit one frame. Returns the number of draws recorded.
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        allocator: &WgpuTerrainAllocator<'_>,
        terrain: &Terrain,
        view_proj: Mat4,
        draws: &DrawList,
    ) -> usize {
        let camera = TerrainCameraUniform::new(
            view_proj,
            terrain.settings(),
            terrain.heightfield().height_range(),
        );
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&camera));
        self.uniforms.write(device, queue, &self.pipeline, draws);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("terrain-frame"),
        });
        let encoded = {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("terrain-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.45,
                            g: 0.6,
                            b: 0.8,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            encode_draws(
                &mut pass,
                &self.pipeline,
                &self.camera_bind_group,
                &self.uniforms,
                allocator,
                draws,
            )
        };
        queue.submit(Some(encoder.finish()));
        encoded
    }
}

fn create_target(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}
