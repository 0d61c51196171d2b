//! Math utilities and types
//!
//! Only the handful of types the render-node layer needs: view matrices and
//! object bounding centres used to compute view-space sort depth.

pub use nalgebra::{Vector3, Vector4, Matrix4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// View-space depth of a world-space point.
///
/// Uses a right-handed view matrix, so points in front of the camera have
/// negative z. The result is the positive distance along the view direction.
pub fn view_depth(view: &Mat4, point: &Point3) -> f32 {
    let view_space = view.transform_point(point);
    -view_space.z
}

/// Build a right-handed look-at view matrix
pub fn look_at(eye: &Point3, target: &Point3, up: &Vec3) -> Mat4 {
    Mat4::look_at_rh(eye, target, up)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_view_depth_along_view_direction() {
        let view = look_at(
            &Point3::new(0.0, 0.0, 10.0),
            &Point3::origin(),
            &Vec3::y(),
        );

        assert_relative_eq!(view_depth(&view, &Point3::origin()), 10.0, epsilon = 1e-5);
        assert_relative_eq!(view_depth(&view, &Point3::new(0.0, 0.0, 5.0)), 5.0, epsilon = 1e-5);
        assert_relative_eq!(view_depth(&view, &Point3::new(3.0, 2.0, -4.0)), 14.0, epsilon = 1e-5);
    }
}
