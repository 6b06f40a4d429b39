// THEORY (single-pixel color math):
// Every color decision in the engine reduces to a handful of per-pixel transforms:
// RGB -> HSV in the 8-bit convention (H in [0,180), S and V in [0,255]), Rec. 601
// luminance for grayscale work, and normalized [0,1] channels for vegetation
// indices. None of these look at neighbours; anything spatial lives in `mask`,
// `segmenter` or `morphology`.
//
// The 8-bit HSV convention matters: every empirical band used downstream
// (vegetation, brown spot, yellowing) is expressed in it, so the conversion rounds
// exactly where an 8-bit pipeline would.

pub mod pixel {
    use image::{GrayImage, Luma, Rgb, RgbImage};

    pub type Hue = u8;
    pub type Saturation = u8;
    pub type Value = u8;

    /// An HSV triple in the 8-bit convention.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Hsv {
        /// Hue, half-degrees in [0, 180).
        pub h: Hue,
        /// Saturation in [0, 255].
        pub s: Saturation,
        /// Value in [0, 255].
        pub v: Value,
    }

    impl Hsv {
        pub fn from_rgb(pixel: Rgb<u8>) -> Self {
            let [r, g, b] = pixel.0;
            let (r, g, b) = (r as f32, g as f32, b as f32);
            let max = r.max(g).max(b);
            let min = r.min(g).min(b);
            let chroma = max - min;

            let s = if max > 0.0 { 255.0 * chroma / max } else { 0.0 };

            let hue_degrees = if chroma == 0.0 {
                0.0
            } else {
                let inverse_chroma = 1.0 / chroma;
                let (base_difference, sector_offset) = if max == r {
                    (g - b, 0.0)
                } else if max == g {
                    (b - r, 2.0)
                } else {
                    (r - g, 4.0)
                };
                let mut degrees = (base_difference * inverse_chroma + sector_offset) * 60.0;
                if degrees < 0.0 {
                    degrees += 360.0;
                }
                degrees
            };

            let mut h = (hue_degrees / 2.0).round();
            if h >= 180.0 {
                h -= 180.0;
            }
            Hsv { h: h as u8, s: s.round() as u8, v: max as u8 }
        }

        /// HSV of a floating-point mean color, rounded to 8 bits first.
        pub fn from_mean(rgb: [f64; 3]) -> Self {
            let to_byte = |c: f64| c.round().clamp(0.0, 255.0) as u8;
            Self::from_rgb(Rgb([to_byte(rgb[0]), to_byte(rgb[1]), to_byte(rgb[2])]))
        }
    }

    /// An inclusive box in HSV space.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HsvRange {
        pub low: Hsv,
        pub high: Hsv,
    }

    impl HsvRange {
        pub const fn new(low: (u8, u8, u8), high: (u8, u8, u8)) -> Self {
            HsvRange {
                low: Hsv { h: low.0, s: low.1, v: low.2 },
                high: Hsv { h: high.0, s: high.1, v: high.2 },
            }
        }

        pub fn contains(&self, hsv: Hsv) -> bool {
            (self.low.h..=self.high.h).contains(&hsv.h)
                && (self.low.s..=self.high.s).contains(&hsv.s)
                && (self.low.v..=self.high.v).contains(&hsv.v)
        }

        /// Binary mask (0/255) of the pixels of `image` inside this range.
        pub fn mask(&self, image: &RgbImage) -> GrayImage {
            GrayImage::from_fn(image.width(), image.height(), |x, y| {
                let inside = self.contains(Hsv::from_rgb(*image.get_pixel(x, y)));
                Luma([if inside { 255 } else { 0 }])
            })
        }
    }

    /// Rec. 601 luma, the weighting an 8-bit grayscale conversion uses.
    pub fn luminance(pixel: Rgb<u8>) -> f64 {
        let [r, g, b] = pixel.0;
        0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64
    }

    pub fn grayscale(image: &RgbImage) -> GrayImage {
        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([luminance(*image.get_pixel(x, y)).round().min(255.0) as u8])
        })
    }

    /// Channels scaled to [0, 1].
    pub fn normalized(pixel: Rgb<u8>) -> [f64; 3] {
        let [r, g, b] = pixel.0;
        [r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0]
    }
}

#[cfg(test)]
mod tests {
    use super::pixel::*;
    use image::Rgb;

    #[test]
    fn primary_colors_map_to_half_degree_hues() {
        assert_eq!(Hsv::from_rgb(Rgb([255, 0, 0])), Hsv { h: 0, s: 255, v: 255 });
        assert_eq!(Hsv::from_rgb(Rgb([0, 255, 0])), Hsv { h: 60, s: 255, v: 255 });
        assert_eq!(Hsv::from_rgb(Rgb([0, 0, 255])), Hsv { h: 120, s: 255, v: 255 });
    }

    #[test]
    fn gray_has_no_hue_or_saturation() {
        assert_eq!(Hsv::from_rgb(Rgb([128, 128, 128])), Hsv { h: 0, s: 0, v: 128 });
        assert_eq!(Hsv::from_rgb(Rgb([0, 0, 0])), Hsv::default());
    }

    #[test]
    fn leaf_green_is_inside_the_vegetation_band() {
        let band = HsvRange::new((25, 40, 40), (85, 255, 255));
        assert!(band.contains(Hsv::from_rgb(Rgb([40, 180, 40]))));
        assert!(!band.contains(Hsv::from_rgb(Rgb([150, 90, 40]))));
        assert!(!band.contains(Hsv::from_rgb(Rgb([10, 10, 10]))));
    }

    #[test]
    fn luminance_uses_rec601_weights() {
        assert!((luminance(Rgb([255, 255, 255])) - 255.0).abs() < 1e-9);
        assert!((luminance(Rgb([0, 255, 0])) - 149.685).abs() < 1e-9);
    }
}
