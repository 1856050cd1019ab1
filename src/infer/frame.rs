use ndarray::Array3;

use crate::catalog::TensorShape;

/// Color layout of an input frame's channel planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Rgb,
    Bgr,
    Grayscale,
}

/// A raw image buffer handed in by the capture pipeline, stored as CHW
/// `f32` planes with declared color-space metadata.
///
/// No format negotiation happens here: the caller is responsible for
/// matching the target model's declared input shape.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pixels: Array3<f32>,
    color_space: ColorSpace,
}

impl ImageFrame {
    pub fn new(pixels: Array3<f32>, color_space: ColorSpace) -> Self {
        Self {
            pixels,
            color_space,
        }
    }

    /// A zero-filled frame with the given channel/height/width extents.
    pub fn zeros(channels: usize, height: usize, width: usize, color_space: ColorSpace) -> Self {
        Self {
            pixels: Array3::zeros((channels, height, width)),
            color_space,
        }
    }

    pub fn pixels(&self) -> &Array3<f32> {
        &self.pixels
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn channels(&self) -> usize {
        self.pixels.shape()[0]
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn width(&self) -> usize {
        self.pixels.shape()[2]
    }

    /// The frame's extents as a declared tensor shape.
    pub fn shape(&self) -> TensorShape {
        TensorShape(self.pixels.shape().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_reports_chw_extents() {
        let frame = ImageFrame::zeros(3, 480, 640, ColorSpace::Rgb);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.height(), 480);
        assert_eq!(frame.width(), 640);
        assert_eq!(frame.shape().dims(), &[3, 480, 640]);
    }
}
