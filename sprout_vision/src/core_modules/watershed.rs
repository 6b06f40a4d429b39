// THEORY:
// The watershed splits a vegetation mask into individual plant instances, so that
// two leaves touching across a thin neck come out as two plants instead of one blob.
// It is a "peak finding and region growing" algorithm over a distance landscape:
//
// 1.  **Distance Landscape**: the Euclidean distance from every mask pixel to the
//     nearest background pixel, normalized to [0, 1]. Plant cores are peaks; necks
//     between touching plants are saddles.
// 2.  **Seeding**: everything above `SEED_LEVEL` becomes a seed. Each connected seed
//     region gets its own label starting at 2; every background pixel is pre-labelled
//     with `BACKGROUND` (1). A mask component left without a seed (a plant much
//     smaller than the largest one in the frame) is seeded at its own distance
//     peak, so separation only ever splits touching plants and never drops one.
// 3.  **Flooding**: unlabelled mask pixels are claimed in order of elevation (the
//     mask gradient), ties broken first-in first-out so fronts advance evenly. A pixel
//     reached by two different labels becomes a boundary and stays unlabelled.
// 4.  **Instances**: each label above `BACKGROUND` is one instance; its contour is the
//     convex hull of its pixels.
//
// Like the rest of `core_modules`, this is stateless: one mask in, one list out.

use image::GrayImage;
use imageproc::distance_transform::euclidean_squared_distance_transform;
use imageproc::point::Point;
use imageproc::region_labelling::{Connectivity, connected_components};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::core_modules::geometry::{Contour, hull};
use crate::core_modules::mask::invert;

pub mod watershed {
    use super::*;

    /// Normalized distance above which a pixel seeds an instance.
    pub const SEED_LEVEL: f64 = 0.4;
    pub const BACKGROUND: u32 = 1;
    const UNLABELLED: u32 = 0;

    /// Splits `mask` into instances and returns one convex contour per instance,
    /// ordered by label.
    pub fn find_instances(mask: &GrayImage) -> Vec<Contour> {
        let labels = flood(mask);
        let (width, height) = mask.dimensions();

        let mut regions: BTreeMap<u32, Vec<Point<i32>>> = BTreeMap::new();
        for y in 0..height {
            for x in 0..width {
                let label = labels[(y * width + x) as usize];
                if label > BACKGROUND {
                    regions.entry(label).or_default().push(Point::new(x as i32, y as i32));
                }
            }
        }

        regions.into_values().map(|pixels| hull(&pixels)).collect()
    }

    /// Runs seeding and flooding, returning a row-major label per pixel.
    pub fn flood(mask: &GrayImage) -> Vec<u32> {
        let (width, height) = mask.dimensions();
        let len = (width * height) as usize;
        let mut labels = vec![UNLABELLED; len];
        if len == 0 {
            return labels;
        }

        // --- 1. Distance landscape and seeds ---
        let distance = distance_to_background(mask);
        let seeds = seed_mask(mask, &distance);
        let seed_labels = connected_components(&seeds, Connectivity::Eight, image::Luma([0u8]));
        for (i, (m, s)) in mask.pixels().zip(seed_labels.pixels()).enumerate() {
            if m.0[0] == 0 {
                labels[i] = BACKGROUND;
            } else if s.0[0] > 0 {
                labels[i] = s.0[0] + BACKGROUND;
            }
        }
        seed_orphan_components(mask, &distance, &mut labels);

        // --- 2. Elevation: mask gradient ---
        let elevation = gradient(mask);

        // --- 3. Priority flood from every labelled pixel ---
        let mut queue: BinaryHeap<Reverse<(u8, u64, usize)>> = BinaryHeap::new();
        let mut queued = vec![false; len];
        let mut sequence = 0u64;
        for i in 0..len {
            if labels[i] > BACKGROUND {
                for n in neighbours(i, width, height) {
                    if labels[n] == UNLABELLED && !queued[n] {
                        queued[n] = true;
                        queue.push(Reverse((elevation[n], sequence, n)));
                        sequence += 1;
                    }
                }
            }
        }

        while let Some(Reverse((_, _, i))) = queue.pop() {
            let mut claim = UNLABELLED;
            let mut contested = false;
            for n in neighbours(i, width, height) {
                let label = labels[n];
                if label <= BACKGROUND {
                    continue;
                }
                if claim == UNLABELLED {
                    claim = label;
                } else if claim != label {
                    contested = true;
                }
            }
            if contested || claim == UNLABELLED {
                continue;
            }
            labels[i] = claim;
            for n in neighbours(i, width, height) {
                if labels[n] == UNLABELLED && !queued[n] {
                    queued[n] = true;
                    queue.push(Reverse((elevation[n], sequence, n)));
                    sequence += 1;
                }
            }
        }

        labels
    }

    /// Row-major Euclidean distance from each pixel to the nearest background
    /// pixel. Infinite everywhere when the mask has no background.
    fn distance_to_background(mask: &GrayImage) -> Vec<f64> {
        euclidean_squared_distance_transform(&invert(mask))
            .pixels()
            .map(|p| p.0[0].sqrt())
            .collect()
    }

    /// Pixels whose normalized distance to the background exceeds `SEED_LEVEL`.
    fn seed_mask(mask: &GrayImage, distance: &[f64]) -> GrayImage {
        let max = distance.iter().copied().filter(|d| d.is_finite()).fold(0.0f64, f64::max);
        let has_background = mask.pixels().any(|p| p.0[0] == 0);
        let width = mask.width();

        GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
            if mask.get_pixel(x, y).0[0] == 0 {
                return image::Luma([0]);
            }
            // A mask with no background at all is one flat plateau: a single seed.
            if !has_background || max <= 0.0 {
                return image::Luma([255]);
            }
            let normalized = distance[(y * width + x) as usize] / max;
            image::Luma([if normalized > SEED_LEVEL { 255 } else { 0 }])
        })
    }

    /// Gives every 4-connected mask component without a seed a one-pixel seed at
    /// its distance peak, numbered after the existing labels.
    fn seed_orphan_components(mask: &GrayImage, distance: &[f64], labels: &mut [u32]) {
        let components = connected_components(mask, Connectivity::Four, image::Luma([0u8]));
        let mut seeded = BTreeSet::new();
        let mut peaks: BTreeMap<u32, (usize, f64)> = BTreeMap::new();
        for (i, c) in components.pixels().enumerate() {
            let component = c.0[0];
            if component == 0 {
                continue;
            }
            if labels[i] > BACKGROUND {
                seeded.insert(component);
            }
            let peak = peaks.entry(component).or_insert((i, distance[i]));
            if distance[i] > peak.1 {
                *peak = (i, distance[i]);
            }
        }

        let mut next = labels.iter().copied().max().unwrap_or(BACKGROUND).max(BACKGROUND) + 1;
        for (component, (i, _)) in peaks {
            if !seeded.contains(&component) {
                labels[i] = next;
                next += 1;
            }
        }
    }

    fn gradient(mask: &GrayImage) -> Vec<u8> {
        let (width, height) = mask.dimensions();
        let raw = mask.as_raw();
        (0..(width * height) as usize)
            .map(|i| {
                let here = raw[i];
                neighbours(i, width, height)
                    .map(|n| here.abs_diff(raw[n]))
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// 4-connected neighbour indices of row-major index `i`.
    fn neighbours(i: usize, width: u32, height: u32) -> impl Iterator<Item = usize> {
        let (w, h) = (width as usize, height as usize);
        let (x, y) = (i % w, i / w);
        [
            (x > 0).then(|| i - 1),
            (x + 1 < w).then(|| i + 1),
            (y > 0).then(|| i - w),
            (y + 1 < h).then(|| i + w),
        ]
        .into_iter()
        .flatten()
    }
}
