//! Encoding a terrain [`DrawList`] into a render pass.
//!
//! Per-draw placement and morph parameters live in one uniform buffer, one
//! slot per draw, selected with a dynamic offset.

use bytemuck::{Pod, Zeroable};

use nebula_terrain::{DrawCommand, DrawList};

use crate::pipeline::TerrainPipeline;
use crate::terrain_buffers::WgpuTerrainAllocator;

/// Distance between draw slots; the default `min_uniform_buffer_offset_alignment`.
pub const DRAW_UNIFORM_STRIDE: u64 = 256;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawUniform {
    pub origin: [f32; 4],
    /// x: transition, y: target LOD.
    pub morph: [f32; 4],
}

static_assertions::const_assert!(std::mem::size_of::<DrawUniform>() as u64 <= DRAW_UNIFORM_STRIDE);

impl From<&DrawCommand> for DrawUniform {
    fn from(cmd: &DrawCommand) -> Self {
        Self {
            origin: [cmd.position.x, cmd.position.y, cmd.position.z, 0.0],
            morph: [cmd.morph.transition, cmd.morph.target_lod, 0.0, 0.0],
        }
    }
}

/// Uniform bytes for every draw in `draws`, [`DRAW_UNIFORM_STRIDE`] apart.
pub fn draw_uniform_bytes(draws: &DrawList) -> Vec<u8> {
    let stride = DRAW_UNIFORM_STRIDE as usize;
    let mut bytes = vec![0u8; draws.len() * stride];
    for (i, cmd) in draws.iter().enumerate() {
        let uniform = DrawUniform::from(cmd);
        bytes[i * stride..i * stride + size_of::<DrawUniform>()]
            .copy_from_slice(bytemuck::bytes_of(&uniform));
    }
    bytes
}

/// Growable uniform buffer holding one [`DrawUniform`] slot per draw.
pub struct DrawUniformBuffer {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    capacity: usize,
}

impl DrawUniformBuffer {
    pub fn new(device: &wgpu::Device, pipeline: &TerrainPipeline, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (buffer, bind_group) = Self::create(device, pipeline, capacity);
        Self {
            buffer,
            bind_group,
            capacity,
        }
    }

    fn create(
        device: &wgpu::Device,
        pipeline: &TerrainPipeline,
        capacity: usize,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain-draw-uniforms"),
            size: capacity as u64 * DRAW_UNIFORM_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("terrain-draw-bind-group"),
            layout: &pipeline.draw_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(size_of::<DrawUniform>() as u64),
                }),
            }],
        });
        (buffer, bind_group)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Upload the slots for `draws`, growing the buffer when it is too small.
    pub fn write(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pipeline: &TerrainPipeline,
        draws: &DrawList,
    ) {
        if draws.len() > self.capacity {
            let capacity = draws.len().next_power_of_two();
            let (buffer, bind_group) = Self::create(device, pipeline, capacity);
            self.buffer = buffer;
            self.bind_group = bind_group;
            self.capacity = capacity;
        }
        if !draws.is_empty() {
            queue.write_buffer(&self.buffer, 0, &draw_uniform_bytes(draws));
        }
    }
}

/// Record every draw in `draws`. Draws whose buffers the allocator no
/// longer holds are skipped.
pub fn encode_draws(
    pass: &mut wgpu::RenderPass<'_>,
    pipeline: &TerrainPipeline,
    camera_bind_group: &wgpu::BindGroup,
    uniforms: &DrawUniformBuffer,
    allocator: &WgpuTerrainAllocator<'_>,
    draws: &DrawList,
) -> usize {
    pass.set_pipeline(&pipeline.pipeline);
    pass.set_bind_group(0, camera_bind_group, &[]);

    let mut encoded = 0;
    for (i, cmd) in draws.iter().enumerate().take(uniforms.capacity()) {
        let (Some(positions), Some(deltas), Some(indices)) = (
            allocator.buffer(cmd.vertex_buffers.positions),
            allocator.buffer(cmd.vertex_buffers.deltas),
            allocator.buffer(cmd.index_buffer.handle),
        ) else {
            continue;
        };
        let offset = (i as u64 * DRAW_UNIFORM_STRIDE) as u32;
        pass.set_bind_group(1, &uniforms.bind_group, &[offset]);
        pass.set_vertex_buffer(0, positions.slice(..));
        pass.set_vertex_buffer(1, deltas.slice(..));
        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..cmd.index_buffer.index_count, 0, 0..1);
        encoded += 1;
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use nebula_lod::LodMorph;
    use nebula_terrain::{BufferHandle, MaterialId, NodeId, SharedIndexBuffer, VertexBufferPair};

    fn command(node: NodeId, transition: f32) -> DrawCommand {
        DrawCommand {
            node,
            material: MaterialId(0),
            position: Vec3::new(1.0, 2.0, 3.0),
            vertex_buffers: VertexBufferPair {
                positions: BufferHandle(0),
                deltas: BufferHandle(1),
                vertex_count: 4,
            },
            index_buffer: SharedIndexBuffer {
                handle: BufferHandle(2),
                index_count: 6,
            },
            morph: LodMorph::new(transition, 1, 0),
        }
    }

    #[test]
    fn test_uniform_slots_are_strided() {
        let draws = DrawList {
            commands: vec![command(NodeId::ROOT, 0.25), command(NodeId::ROOT, 0.75)],
        };
        let bytes = draw_uniform_bytes(&draws);
        assert_eq!(bytes.len(), 512);

        let second: DrawUniform =
            bytemuck::pod_read_unaligned(&bytes[256..256 + size_of::<DrawUniform>()]);
        assert_eq!(second.origin, [1.0, 2.0, 3.0, 0.0]);
        assert_eq!(second.morph[0], 0.75);
        assert_eq!(second.morph[1], 2.0, "target LOD is one past the rendered level");
        assert!(bytes[size_of::<DrawUniform>()..256].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_empty_list_has_no_bytes() {
        assert!(draw_uniform_bytes(&DrawList::default()).is_empty());
    }

    fn test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
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
            adapter
                .request_device(&wgpu::DeviceDescriptor::default())
                .await
                .ok()
        })
    }

    /// A selected frame encodes one draw per command into an offscreen pass.
    #[test]
    fn test_encode_terrain_frame() {
        use nebula_lod::ErrorCoefficient;
        use nebula_terrain::{
            Heightfield, LodSelectionParams, MaterialLibrary, Terrain, TerrainSettings,
        };
        use wgpu::util::DeviceExt;

        let Some((device, queue)) = test_device() else {
            return;
        };
        let settings = TerrainSettings {
            size: 129,
            world_size: 1280.0,
            max_batch_size: 33,
            min_batch_size: 17,
            ..Default::default()
        };
        let field = Heightfield::from_fn(settings, |x, y| ((x + y) % 9) as f32).unwrap();
        let mut terrain = Terrain::new(field, 65).unwrap();
        let mut alloc = WgpuTerrainAllocator::new(&device, &queue);
        terrain.load(&mut alloc);

        let mut materials = MaterialLibrary::new();
        let params = LodSelectionParams {
            camera_position: Vec3::new(0.0, 40.0, 0.0),
            error_coefficient: ErrorCoefficient::new(400.0),
            enable_morph: true,
        };
        let (_, draws) = terrain.update(&params, &mut materials);
        assert!(!draws.is_empty());

        let pipeline = TerrainPipeline::new(&device, wgpu::TextureFormat::Rgba8Unorm, None);
        let mut uniforms = DrawUniformBuffer::new(&device, &pipeline, 1);
        uniforms.write(&device, &queue, &pipeline, &draws);
        assert!(uniforms.capacity() >= draws.len());

        let camera = crate::pipeline::TerrainCameraUniform::new(
            glam::Mat4::IDENTITY,
            terrain.settings(),
            terrain.heightfield().height_range(),
        );
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("test-camera"),
            contents: bytemuck::bytes_of(&camera),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("test-camera"),
            layout: &pipeline.camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("test-target"),
            size: wgpu::Extent3d {
                width: 64,
                height: 64,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("test-encoder"),
        });
        let encoded = {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("test-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            encode_draws(&mut pass, &pipeline, &camera_bind_group, &uniforms, &alloc, &draws)
        };
        queue.submit(Some(encoder.finish()));
        assert_eq!(encoded, draws.len());
    }
}
