use crate::data_structures::{
    instance::InstanceRaw,
    model::{ModelVertex, Vertex},
    texture::Texture,
};

use super::basic::{mesh_shader, mk_render_pipeline};

/// The video backdrop: drawn first, never writes depth and never culls, so
/// everything drawn afterwards lands in front of it.
pub fn mk_background_pipeline(
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
    layout: &wgpu::PipelineLayout,
) -> wgpu::RenderPipeline {
    mk_render_pipeline(
        device,
        layout,
        config.format,
        Some(wgpu::BlendState::REPLACE),
        Some(Texture::DEPTH_FORMAT),
        false,
        None,
        &[ModelVertex::desc(), InstanceRaw::desc()],
        mesh_shader(),
    )
}
