//! Input images and their on-disk descriptions.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transform::{full_mask, MASK_VALID};

/// An image and an optional validity mask of the same size.
/// No mask means every pixel is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetData {
    pub image: GrayImage,
    pub mask: Option<GrayImage>,
}

impl TargetData {
    pub fn new(image: GrayImage) -> Self {
        Self { image, mask: None }
    }

    pub fn with_mask(mut self, mask: GrayImage) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn check_mask(&self) -> Result<()> {
        match &self.mask {
            Some(mask) if mask.dimensions() != self.image.dimensions() => Err(Error::MaskSize {
                mask: mask.dimensions(),
                image: self.image.dimensions(),
            }),
            _ => Ok(()),
        }
    }

    /// The explicit mask, or a full-valid one sized to the image
    pub fn validity_mask(&self) -> Cow<'_, GrayImage> {
        match &self.mask {
            Some(mask) => Cow::Borrowed(mask),
            None => Cow::Owned(full_mask(self.image.width(), self.image.height())),
        }
    }
}

/// Where a target image lives and which polygon of it is valid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescription {
    pub image_path: PathBuf,
    /// Polygon vertices in pixel coordinates; empty means the whole image
    #[serde(default)]
    pub contour: Vec<(i32, i32)>,
}

impl TargetDescription {
    /// Describe the whole of a `width` x `height` image
    pub fn full_frame(image_path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        let (w, h) = (width as i32 - 1, height as i32 - 1);
        Self {
            image_path: image_path.into(),
            contour: vec![(0, 0), (w, 0), (w, h), (0, h)],
        }
    }

    /// Image path resolved against `base_dir` when relative
    pub fn resolve_path(&self, base_dir: &Path) -> PathBuf {
        if self.image_path.is_absolute() {
            self.image_path.clone()
        } else {
            base_dir.join(&self.image_path)
        }
    }

    /// Load the image as grayscale and rasterise the contour into a mask
    pub fn to_data(&self, base_dir: &Path) -> Result<TargetData> {
        let path = self.resolve_path(base_dir);
        let image = image::open(&path)?.to_luma8();
        let mask = self.contour_mask(image.width(), image.height());
        Ok(TargetData { image, mask })
    }

    /// Filled contour polygon, or `None` when the contour has fewer than
    /// three distinct vertices
    pub fn contour_mask(&self, width: u32, height: u32) -> Option<GrayImage> {
        let mut points: Vec<Point<i32>> = Vec::with_capacity(self.contour.len());
        for &(x, y) in &self.contour {
            let p = Point::new(x, y);
            if points.last() != Some(&p) {
                points.push(p);
            }
        }
        while points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 {
            return None;
        }
        let mut mask = GrayImage::new(width, height);
        draw_polygon_mut(&mut mask, &points, Luma([MASK_VALID]));
        Some(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_mask_synthesised() {
        let target = TargetData::new(GrayImage::new(12, 8));
        let mask = target.validity_mask();
        assert_eq!(mask.dimensions(), (12, 8));
        assert!(mask.pixels().all(|p| p[0] == MASK_VALID));
    }

    #[test]
    fn test_full_frame_contour_covers_image() {
        let desc = TargetDescription::full_frame("a.png", 20, 10);
        let mask = desc.contour_mask(20, 10).unwrap();
        assert!(mask.pixels().all(|p| p[0] == MASK_VALID));
    }

    #[test]
    fn test_partial_contour() {
        let desc = TargetDescription {
            image_path: "a.png".into(),
            contour: vec![(2, 2), (10, 2), (10, 8), (2, 8), (2, 2)],
        };
        let mask = desc.contour_mask(20, 20).unwrap();
        assert_eq!(mask.get_pixel(5, 5)[0], MASK_VALID);
        assert_eq!(mask.get_pixel(15, 15)[0], 0);
    }

    #[test]
    fn test_degenerate_contour_has_no_mask() {
        let desc = TargetDescription {
            image_path: "a.png".into(),
            contour: vec![(1, 1), (5, 5)],
        };
        assert!(desc.contour_mask(10, 10).is_none());
    }

    #[test]
    fn test_relative_path_resolution() {
        let desc = TargetDescription::full_frame("img/a.png", 4, 4);
        assert_eq!(
            desc.resolve_path(Path::new("/data")),
            PathBuf::from("/data/img/a.png")
        );
    }
}
