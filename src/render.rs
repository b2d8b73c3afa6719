//! Drawing a [`Stage`] into the window.
//!
//! The scene graph holds CPU data only. [`SceneRenderer`] uploads geometry and
//! materials the first time they are drawn and keeps them in a [`GpuCache`]
//! keyed by their ids; entries not drawn for [`EVICT_AFTER_FRAMES`] frames
//! (removed nodes) are dropped again.
//!
//! Each frame runs two pipelines in one pass:
//! 1. the backdrop quad with the latest video frame, without depth writes
//! 2. every mesh of the scene graph in traversal order
//!
//! All world transforms of the frame go into one instance buffer; slot 0 is the
//! backdrop, slot `i + 1` the `i`-th draw item.

use std::{collections::HashMap, hash::Hash, iter};

use wgpu::util::DeviceExt;

use crate::{
    capture::Frame,
    context::Context,
    data_structures::{
        instance::InstanceRaw,
        model::{Geometry, GeometryId, Material, MaterialId},
        texture::{Texture, create_default_sampler},
    },
    pipelines::light::LightUniform,
    stage::Stage,
};

/// Frames a cached GPU resource survives without being drawn.
pub const EVICT_AFTER_FRAMES: u64 = 120;

/// A GPU resource and the frame it was last drawn in.
#[derive(Debug)]
struct CacheEntry<T> {
    value: T,
    last_used: u64,
}

/// Frame-stamped cache of uploaded resources.
#[derive(Debug)]
pub struct GpuCache<K, T> {
    entries: HashMap<K, CacheEntry<T>>,
}

impl<K: Eq + Hash + Copy, T> Default for GpuCache<K, T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Copy, T> GpuCache<K, T> {
    /// Mark `key` as used in `frame`, creating the value on first use.
    pub fn touch(&mut self, key: K, frame: u64, create: impl FnOnce() -> T) {
        self.entries
            .entry(key)
            .or_insert_with(|| CacheEntry {
                value: create(),
                last_used: frame,
            })
            .last_used = frame;
    }

    pub fn get(&self, key: &K) -> Option<&T> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Drop everything unused for more than `keep` frames. Returns how many.
    pub fn evict(&mut self, frame: u64, keep: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| frame.saturating_sub(entry.last_used) <= keep);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// We need this for Rust to store our data correctly for the shaders
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    base_color: [f32; 4],
    lit: u32,
    // Uniform structs are padded to 16 bytes
    _padding: [u32; 3],
}

impl MaterialUniform {
    pub fn new(material: &Material) -> Self {
        Self {
            base_color: material.base_color,
            lit: material.lit as u32,
            _padding: [0; 3],
        }
    }
}

#[derive(Debug)]
struct GpuGeometry {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    count: u32,
}

impl GpuGeometry {
    fn new(device: &wgpu::Device, geometry: &Geometry) -> Self {
        let vertex = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Vertex Buffer", geometry.name)),
            contents: bytemuck::cast_slice(&geometry.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Index Buffer", geometry.name)),
            contents: bytemuck::cast_slice(&geometry.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex,
            index,
            count: geometry.indices.len() as u32,
        }
    }
}

/// Texture, uniform and bind group of one material.
#[derive(Debug)]
struct GpuMaterial {
    texture: Texture,
    uniform: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl GpuMaterial {
    fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        texture: Texture,
        uniform: MaterialUniform,
    ) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Material Buffer"),
            contents: bytemuck::cast_slice(&[uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = mk_material_bind_group(device, layout, sampler, &texture, &buffer);
        Self {
            texture,
            uniform: buffer,
            bind_group,
        }
    }

    fn upload(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        material: &Material,
    ) -> Self {
        let texture = match &material.texture {
            Some(image) => Texture::from_image(device, queue, image, Some(&material.name)),
            None => Texture::solid(device, queue, [255; 4], &material.name),
        };
        Self::new(device, layout, sampler, texture, MaterialUniform::new(material))
    }

    /// Swap the texture, e.g. after the video resolution changed.
    fn replace_texture(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        texture: Texture,
    ) {
        self.bind_group = mk_material_bind_group(device, layout, sampler, &texture, &self.uniform);
        self.texture = texture;
    }
}

fn mk_material_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    texture: &Texture,
    uniform: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(texture.sampler.as_ref().unwrap_or(sampler)),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: uniform.as_entire_binding(),
            },
        ],
        label: Some("material_bind_group"),
    })
}

#[derive(Debug)]
pub struct SceneRenderer {
    geometries: GpuCache<GeometryId, GpuGeometry>,
    materials: GpuCache<MaterialId, GpuMaterial>,
    sampler: wgpu::Sampler,
    instances: wgpu::Buffer,
    instance_capacity: usize,
    backdrop: GpuMaterial,
    frame: u64,
}

impl SceneRenderer {
    const INITIAL_INSTANCES: usize = 64;

    /// `backdrop` supplies the colour and lighting flag of the video quad.
    pub fn new(ctx: &Context, backdrop: &Material) -> Self {
        let sampler = create_default_sampler(&ctx.device);
        // black until the camera delivers its first frame
        let blank = Texture::solid(&ctx.device, &ctx.queue, [0, 0, 0, 255], "backdrop");
        let backdrop = GpuMaterial::new(
            &ctx.device,
            &ctx.pipelines.material_layout,
            &sampler,
            blank,
            MaterialUniform::new(backdrop),
        );
        Self {
            geometries: GpuCache::default(),
            materials: GpuCache::default(),
            instances: mk_instance_buffer(&ctx.device, Self::INITIAL_INSTANCES),
            instance_capacity: Self::INITIAL_INSTANCES,
            sampler,
            backdrop,
            frame: 0,
        }
    }

    /// Draw one frame of `stage` and present it.
    pub fn render(&mut self, ctx: &mut Context, stage: &Stage) -> Result<(), wgpu::SurfaceError> {
        self.frame += 1;
        let output = ctx.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        ctx.update_camera(stage.camera(), stage.projection());
        let light = stage
            .scene()
            .primary_light()
            .map(|(position, light)| LightUniform::new(position, light))
            .unwrap_or_else(LightUniform::dark);
        ctx.light.update(&ctx.queue, light);
        self.upload_frame(ctx, stage.capture().current_frame());

        let items = stage.scene().draw_items();
        let backdrop_geometry = &stage.backdrop().mesh().geometry;
        let raws: Vec<InstanceRaw> = iter::once(stage.backdrop().transform().to_raw())
            .chain(items.iter().map(|item| item.world.to_raw()))
            .collect();
        self.write_instances(ctx, &raws);

        let frame = self.frame;
        let (device, queue) = (&ctx.device, &ctx.queue);
        self.geometries
            .touch(backdrop_geometry.id(), frame, || GpuGeometry::new(device, backdrop_geometry));
        for item in &items {
            let geometry = &item.mesh.geometry;
            let material = &item.mesh.material;
            if geometry.indices.is_empty() {
                continue;
            }
            self.geometries
                .touch(geometry.id(), frame, || GpuGeometry::new(device, geometry));
            let (layout, sampler) = (&ctx.pipelines.material_layout, &self.sampler);
            self.materials.touch(material.id(), frame, || {
                GpuMaterial::upload(device, queue, layout, sampler, material)
            });
        }

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(ctx.clear_colour),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &ctx.depth_texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_bind_group(1, &ctx.camera.bind_group, &[]);
            render_pass.set_bind_group(2, &ctx.light.bind_group, &[]);

            if let Some(quad) = self.geometries.get(&backdrop_geometry.id()) {
                render_pass.set_pipeline(&ctx.pipelines.background);
                render_pass.set_bind_group(0, &self.backdrop.bind_group, &[]);
                render_pass.set_vertex_buffer(0, quad.vertex.slice(..));
                render_pass.set_vertex_buffer(1, instance_slot(&self.instances, 0));
                render_pass.set_index_buffer(quad.index.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..quad.count, 0, 0..1);
            }

            render_pass.set_pipeline(&ctx.pipelines.mesh);
            for (slot, item) in (1..).zip(&items) {
                let (Some(geometry), Some(material)) = (
                    self.geometries.get(&item.mesh.geometry.id()),
                    self.materials.get(&item.mesh.material.id()),
                ) else {
                    continue;
                };
                render_pass.set_bind_group(0, &material.bind_group, &[]);
                render_pass.set_vertex_buffer(0, geometry.vertex.slice(..));
                render_pass.set_vertex_buffer(1, instance_slot(&self.instances, slot));
                render_pass.set_index_buffer(geometry.index.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..geometry.count, 0, 0..1);
            }
        }

        ctx.queue.submit(iter::once(encoder.finish()));
        output.present();

        let evicted = self.geometries.evict(frame, EVICT_AFTER_FRAMES)
            + self.materials.evict(frame, EVICT_AFTER_FRAMES);
        if evicted > 0 {
            log::debug!("Released {} unused GPU resources", evicted);
        }
        Ok(())
    }

    fn write_instances(&mut self, ctx: &Context, raws: &[InstanceRaw]) {
        if raws.len() > self.instance_capacity {
            self.instance_capacity = raws.len().next_power_of_two();
            self.instances = mk_instance_buffer(&ctx.device, self.instance_capacity);
        }
        ctx.queue
            .write_buffer(&self.instances, 0, bytemuck::cast_slice(raws));
    }

    /// Copy the current camera frame into the backdrop texture, resizing it
    /// when the resolution changed. Without a frame the last one stays.
    fn upload_frame(&mut self, ctx: &Context, frame: Option<Frame<'_>>) {
        let Some(frame) = frame else {
            return;
        };
        let (width, height) = match frame {
            Frame::Rgba { width, height, .. } => (width, height),
            #[cfg(target_arch = "wasm32")]
            Frame::Video(video) => (video.video_width(), video.video_height()),
        };
        if width == 0 || height == 0 {
            return;
        }
        if self.backdrop.texture.size() != (width, height) {
            log::info!("Camera resolution {}x{}", width, height);
            let texture = Texture::create_frame_texture(&ctx.device, width, height, "backdrop");
            self.backdrop.replace_texture(
                &ctx.device,
                &ctx.pipelines.material_layout,
                &self.sampler,
                texture,
            );
        }
        match frame {
            Frame::Rgba { data, .. } => {
                if data.len() != (width * height * 4) as usize {
                    log::warn!("Dropping a camera frame of {} bytes for {}x{}", data.len(), width, height);
                    return;
                }
                self.backdrop.texture.write_rgba(&ctx.queue, width, height, data);
            }
            #[cfg(target_arch = "wasm32")]
            Frame::Video(video) => {
                ctx.queue.copy_external_image_to_texture(
                    &wgpu::CopyExternalImageSourceInfo {
                        source: wgpu::ExternalImageSource::HTMLVideoElement(video.clone()),
                        origin: wgpu::Origin2d::ZERO,
                        flip_y: false,
                    },
                    wgpu::CopyExternalImageDestInfo {
                        texture: &self.backdrop.texture.texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                        color_space: wgpu::PredefinedColorSpace::Srgb,
                        premultiplied_alpha: false,
                    },
                    wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                );
            }
        }
    }
}

/// One instance of the shared buffer. Offsetting the slice instead of the
/// instance range keeps WebGL2 (no base instance) working.
fn instance_slot(buffer: &wgpu::Buffer, slot: u64) -> wgpu::BufferSlice<'_> {
    let stride = std::mem::size_of::<InstanceRaw>() as wgpu::BufferAddress;
    buffer.slice(slot * stride..(slot + 1) * stride)
}

fn mk_instance_buffer(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Instance Buffer"),
        size: (capacity * std::mem::size_of::<InstanceRaw>()) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_creates_once_and_evicts_stale_entries() {
        let mut cache: GpuCache<u32, String> = GpuCache::default();
        let mut created = 0;
        for frame in 1..=3 {
            cache.touch(7, frame, || {
                created += 1;
                "seven".to_string()
            });
        }
        assert_eq!(created, 1);
        cache.touch(8, 3, || "eight".to_string());

        assert_eq!(cache.evict(3 + EVICT_AFTER_FRAMES, EVICT_AFTER_FRAMES), 0);
        cache.touch(8, 4 + EVICT_AFTER_FRAMES, || unreachable!());
        assert_eq!(cache.evict(4 + EVICT_AFTER_FRAMES, EVICT_AFTER_FRAMES), 1);
        assert!(cache.get(&7).is_none());
        assert_eq!(cache.get(&8).map(String::as_str), Some("eight"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn material_uniform_matches_the_shader_struct() {
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 32);
        let uniform = MaterialUniform::new(&Material::from_hex("box", 0xff0000));
        assert_eq!(uniform.base_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(uniform.lit, 1);
    }
}
