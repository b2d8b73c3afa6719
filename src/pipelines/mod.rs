//! Render pipelines.
//!
//! Both pipelines share one shader and one layout
//! (material, camera, light); they differ only in depth and cull state.

pub mod background;
pub mod basic;
pub mod light;

#[derive(Debug)]
pub struct Pipelines {
    pub material_layout: wgpu::BindGroupLayout,
    pub mesh: wgpu::RenderPipeline,
    pub background: wgpu::RenderPipeline,
}

impl Pipelines {
    pub fn new(
        device: &wgpu::Device,
        config: &wgpu::SurfaceConfiguration,
        camera_bind_group_layout: &wgpu::BindGroupLayout,
        light_bind_group_layout: &wgpu::BindGroupLayout,
    ) -> Self {
        let material_layout = basic::material_layout(device);
        let layout = basic::mk_pipeline_layout(
            device,
            &material_layout,
            camera_bind_group_layout,
            light_bind_group_layout,
        );
        Self {
            mesh: basic::mk_basic_pipeline(device, config, &layout),
            background: background::mk_background_pipeline(device, config, &layout),
            material_layout,
        }
    }
}
