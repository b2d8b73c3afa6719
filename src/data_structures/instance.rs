//! Local/world transforms and their GPU representation.
//!
//! Every scene node carries an [`Instance`] as its local transform. World
//! transforms are obtained by composing the parent's world transform with the
//! child's local one (`parent * local`) and are uploaded per mesh as
//! [`InstanceRaw`].

use std::ops::Mul;

use cgmath::{Euler, Matrix, One, Rad, SquareMatrix};

use crate::data_structures::model;

/// Position, rotation (as quaternion), and scale of a node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instance {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Instance {
    /// Identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn with_position(mut self, position: impl Into<cgmath::Vector3<f32>>) -> Self {
        self.position = position.into();
        self
    }

    pub fn with_uniform_scale(mut self, scale: f32) -> Self {
        self.scale = cgmath::Vector3::new(scale, scale, scale);
        self
    }

    /// Sets the rotation from intrinsic x/y/z angles in radians.
    pub fn set_euler(&mut self, x: f32, y: f32, z: f32) {
        self.rotation = Euler::new(Rad(x), Rad(y), Rad(z)).into();
    }

    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from(self.rotation)
            * cgmath::Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    pub fn to_raw(&self) -> InstanceRaw {
        let model = self.to_matrix();
        // inverse-transpose keeps normals perpendicular under non-uniform scale
        let normal = model
            .invert()
            .map(|inverse| {
                let t = inverse.transpose();
                cgmath::Matrix3::from_cols(t.x.truncate(), t.y.truncate(), t.z.truncate())
            })
            .unwrap_or_else(|| cgmath::Matrix3::from(self.rotation));
        InstanceRaw {
            model: model.into(),
            normal: normal.into(),
        }
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

impl From<cgmath::Vector3<f32>> for Instance {
    fn from(position: cgmath::Vector3<f32>) -> Self {
        Instance {
            position,
            ..Default::default()
        }
    }
}

impl<'a, 'b> Mul<&'b Instance> for &'a Instance {
    type Output = Instance;

    fn mul(self, rhs: &'b Instance) -> Self::Output {
        let new_rotation = self.rotation * rhs.rotation;

        let new_scale = cgmath::Vector3::new(
            self.scale.x * rhs.scale.x,
            self.scale.y * rhs.scale.y,
            self.scale.z * rhs.scale.z,
        );
        let scaled_rhs_pos = cgmath::Vector3::new(
            self.scale.x * rhs.position.x,
            self.scale.y * rhs.position.y,
            self.scale.z * rhs.position.z,
        );
        let new_position = self.position + (self.rotation * scaled_rhs_pos);

        Instance {
            position: new_position,
            rotation: new_rotation,
            scale: new_scale,
        }
    }
}

impl Mul<Instance> for Instance {
    type Output = Self;

    fn mul(self, rhs: Instance) -> Self::Output {
        &self * &rhs
    }
}

/**
 * The raw instance is the actual data stored on the GPU
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    model: [[f32; 4]; 4],
    normal: [[f32; 3]; 3],
}

/**
 * Stride layout here: the 4x4 world matrix (four vec4 slots) followed by the
 * 3x3 normal matrix (three vec3 slots).
 */
impl model::Vertex for InstanceRaw {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<InstanceRaw>() as wgpu::BufferAddress,
            // Only advance to the next element once per instance
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 6,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 7,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 12]>() as wgpu::BufferAddress,
                    shader_location: 8,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 16]>() as wgpu::BufferAddress,
                    shader_location: 9,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 19]>() as wgpu::BufferAddress,
                    shader_location: 10,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 22]>() as wgpu::BufferAddress,
                    shader_location: 11,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Rotation3, Vector3};

    fn approx(a: Vector3<f32>, b: Vector3<f32>) -> bool {
        (a - b).x.abs() < 1e-5 && (a - b).y.abs() < 1e-5 && (a - b).z.abs() < 1e-5
    }

    #[test]
    fn parent_scale_and_rotation_apply_to_child_position() {
        let parent = Instance {
            position: Vector3::new(1.0, 0.0, 0.0),
            rotation: cgmath::Quaternion::from_angle_z(cgmath::Deg(90.0)),
            scale: Vector3::new(2.0, 2.0, 2.0),
        };
        let child = Instance::new().with_position([1.0, 0.0, 0.0]);

        let world = &parent * &child;

        assert!(approx(world.position, Vector3::new(1.0, 2.0, 0.0)));
        assert!(approx(world.scale, Vector3::new(2.0, 2.0, 2.0)));
    }

    #[test]
    fn identity_is_neutral() {
        let node = Instance::new()
            .with_position([3.0, -1.0, 2.0])
            .with_uniform_scale(2.0);
        assert_eq!(Instance::new() * node, node);
    }
}
