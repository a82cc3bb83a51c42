use nalgebra::{Matrix2, Matrix2x3, Vector2};

use crate::sampling::SampleParameter;

/// 2x3 affine map from original image coordinates to sample coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMap {
    m: Matrix2x3<f64>,
}

impl Default for AffineMap {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineMap {
    pub fn identity() -> Self {
        Self {
            m: Matrix2x3::identity(),
        }
    }

    pub fn from_matrix(m: Matrix2x3<f64>) -> Self {
        Self { m }
    }

    pub fn matrix(&self) -> &Matrix2x3<f64> {
        &self.m
    }

    pub fn is_identity(&self) -> bool {
        self.m == Matrix2x3::identity()
    }

    /// Rotation by `phi` degrees about the origin.
    ///
    /// Same convention as the usual image-space rotation matrix: a positive
    /// angle turns content counter-clockwise on screen (y pointing down).
    pub fn rotation(phi_degrees: f64) -> Self {
        let (s, c) = phi_degrees.to_radians().sin_cos();
        #[rustfmt::skip]
        let m = Matrix2x3::new(
             c, s, 0.0,
            -s, c, 0.0,
        );
        Self { m }
    }

    pub fn linear(&self) -> Matrix2<f64> {
        self.m.fixed_view::<2, 2>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector2<f64> {
        self.m.column(2).into_owned()
    }

    /// Append a translation applied after this map
    pub fn then_translate(mut self, tx: f64, ty: f64) -> Self {
        self.m[(0, 2)] += tx;
        self.m[(1, 2)] += ty;
        self
    }

    /// Append a horizontal scale applied after this map
    pub fn then_scale_x(mut self, sx: f64) -> Self {
        for col in 0..3 {
            self.m[(0, col)] *= sx;
        }
        self
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let p = self.m * nalgebra::Vector3::new(x, y, 1.0);
        (p.x, p.y)
    }

    /// Exact affine inverse.
    ///
    /// # Panics
    /// If the linear part is singular. Sample parameters always have
    /// `tilt >= 1`, so a singular map means the caller built it by hand.
    pub fn invert(&self) -> AffineMap {
        let linear = self.linear();
        let inv = linear
            .try_inverse()
            .filter(|_| linear.determinant().abs() > f64::EPSILON);
        let Some(inv) = inv else {
            panic!("affine map is singular: {:?}", self.m);
        };
        let t = -(inv * self.translation());
        let mut m = Matrix2x3::zeros();
        m.fixed_view_mut::<2, 2>(0, 0).copy_from(&inv);
        m.set_column(2, &t);
        Self { m }
    }
}

/// Integer bounding box of a transformed image, inclusive of the pixel
/// containing the maximum corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBounds {
    pub min_x: i64,
    pub min_y: i64,
    pub width: u32,
    pub height: u32,
}

/// Compute the bounding box of the transformed image
pub fn compute_output_bounds(map: &AffineMap, width: u32, height: u32) -> OutputBounds {
    let corners = [
        (0.0, 0.0),
        (width as f64, 0.0),
        (width as f64, height as f64),
        (0.0, height as f64),
    ];

    let transformed: Vec<(f64, f64)> = corners.iter().map(|&(x, y)| map.apply(x, y)).collect();

    let min_x = transformed.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = transformed.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = transformed.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = transformed.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    let (x0, y0) = (min_x.floor(), min_y.floor());
    OutputBounds {
        min_x: x0 as i64,
        min_y: y0 as i64,
        width: (max_x.floor() - x0) as u32 + 1,
        height: (max_y.floor() - y0) as u32 + 1,
    }
}

/// How one sample view is produced from the source image.
///
/// The view is built in two steps: an optional rotation onto a canvas sized
/// to the rotated bounding box, then an optional horizontal compression by
/// `tilt`. `forward` is the composition of both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleWarp {
    pub param: SampleParameter,
    /// Rotation (with bounding-box offset) and the rotated canvas size
    pub rotation: Option<(AffineMap, (u32, u32))>,
    pub forward: AffineMap,
    /// Size of the final sample image
    pub size: (u32, u32),
}

impl SampleWarp {
    pub fn is_identity(&self) -> bool {
        self.rotation.is_none() && self.param.tilt == 1.0
    }

    pub fn inverse(&self) -> AffineMap {
        self.forward.invert()
    }
}

/// Build the forward map of a sample for a `width` x `height` source
pub fn build_forward(param: SampleParameter, width: u32, height: u32) -> SampleWarp {
    let mut forward = AffineMap::identity();
    let mut size = (width, height);
    let mut rotation = None;

    if param.phi != 0.0 {
        let rotated = AffineMap::rotation(param.phi);
        let bounds = compute_output_bounds(&rotated, width, height);
        forward = rotated.then_translate(-bounds.min_x as f64, -bounds.min_y as f64);
        size = (bounds.width, bounds.height);
        rotation = Some((forward, size));
    }

    if param.tilt != 1.0 {
        forward = forward.then_scale_x(1.0 / param.tilt);
        size.0 = ((size.0 as f64 / param.tilt).round() as u32).max(1);
    }

    SampleWarp {
        param,
        rotation,
        forward,
        size,
    }
}
