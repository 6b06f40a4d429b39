use image::{GrayImage, Luma, Rgb, RgbImage};
use sprout_vision::config::{ProcessingConfig, VisionConfig};
use sprout_vision::core_modules::classifier::{InstanceClassifier, PlantType};
use sprout_vision::core_modules::geometry::BoundingBox;
use sprout_vision::core_modules::morphology::MorphologyAnalyzer;
use sprout_vision::core_modules::segmenter::FrameSegmenter;
use sprout_vision::pipeline::{ChangeDetector, PlantPipeline};
use sprout_vision::transport::MqttClient;
use sprout_vision::transport::codec::encode_remaining_length;
use sprout_vision::TransportError;
use std::io::Cursor;

fn disc_mask(width: u32, height: u32, centers: &[(f64, f64)], radius: f64) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let inside = centers.iter().any(|(cx, cy)| (x as f64 - cx).hypot(y as f64 - cy) <= radius);
        Luma([if inside { 255 } else { 0 }])
    })
}

#[test]
fn touching_blobs_are_never_merged() {
    let segmenter = FrameSegmenter::new(&ProcessingConfig::default());
    let mask = disc_mask(200, 100, &[(50.0, 50.0), (108.0, 50.0)], 30.0);
    let instances = segmenter.instances_from_mask(&mask);
    assert_eq!(instances.len(), 2);

    let (left, right) = if instances[0].bbox.x < instances[1].bbox.x {
        (&instances[0], &instances[1])
    } else {
        (&instances[1], &instances[0])
    };
    assert!(left.bbox.x < 30 && right.bbox.x > 70);
}

#[test]
fn small_area_is_a_sprout_and_tall_large_area_is_a_plant() {
    for scale in [0.0, 5.0, 40.0] {
        let classifier = InstanceClassifier::new(&ProcessingConfig { scale_px_per_cm: scale, ..Default::default() });
        let bbox = BoundingBox { x: 0, y: 0, width: 50, height: 50 };
        assert_eq!(classifier.classify_region(None, &bbox, 2000.0), PlantType::Sprout);
    }

    let classifier = InstanceClassifier::new(&ProcessingConfig { scale_px_per_cm: 10.0, ..Default::default() });
    let bbox = BoundingBox { x: 0, y: 0, width: 80, height: 100 };
    let crop = RgbImage::from_pixel(80, 100, Rgb([40, 180, 40]));
    assert_eq!(classifier.classify_region(Some(&crop), &bbox, 6000.0), PlantType::Plant);
}

#[test]
fn filled_disc_is_circular_and_solid() {
    for radius in [20.0, 40.0] {
        let size = (radius as u32) * 3;
        let c = size as f64 / 2.0;
        let mask = disc_mask(size, size, &[(c, c)], radius);
        let metrics = MorphologyAnalyzer::new().analyze(&mask, &RgbImage::new(size, size));
        assert!((metrics.circularity - 1.0).abs() <= 0.05, "r={radius}: circularity {}", metrics.circularity);
        assert!((metrics.solidity - 1.0).abs() <= 0.05, "r={radius}: solidity {}", metrics.solidity);
    }
}

#[test]
fn identical_frames_report_no_change() {
    let frame = RgbImage::from_fn(320, 240, |x, y| {
        let a = (x as f64 - 90.0).hypot(y as f64 - 120.0) <= 35.0;
        let b = (x as f64 - 230.0).hypot(y as f64 - 120.0) <= 28.0;
        if a || b { Rgb([50, 170, 45]) } else { Rgb([30, 20, 10]) }
    });
    let mut pipeline = PlantPipeline::new(&VisionConfig::default());

    let first = pipeline.analyze(&frame);
    let first_change = first.change.as_ref().expect("change metrics attached");
    assert!(!first_change.significant_change);
    assert!(pipeline.change_detector().has_baseline());

    let second = pipeline.analyze(&frame);
    let changes = &second.change.as_ref().expect("change metrics attached").changes;
    assert!(!second.significant_change());
    assert!(changes.total_area_change < 1e-9);
    assert_eq!(changes.plant_count_change, 0);
    assert!(changes.avg_color_change_h < 1e-9);
    assert!(changes.avg_color_change_s < 1e-9);
    assert!(changes.avg_color_change_v < 1e-9);
    assert!(changes.morphology_change < 1e-9);
}

#[test]
fn first_call_always_bootstraps() {
    let mut detector = ChangeDetector::default();
    let metrics = detector.analyze_frame(&[]);
    assert!(!metrics.significant_change);
    assert!(detector.has_baseline());
}

#[test]
fn publish_before_connect_does_no_io() {
    let mut client: MqttClient<Cursor<Vec<u8>>> = MqttClient::unconnected("localhost", 1883);
    assert!(matches!(client.publish("plants", b"{}", 0, false), Err(TransportError::NotConnected)));
    assert!(client.stream().is_none());

    let mut tcp_client = MqttClient::new("localhost", 1883);
    assert!(matches!(tcp_client.publish("plants", b"{}", 0, false), Err(TransportError::NotConnected)));
}

#[test]
fn remaining_length_varint_vectors() {
    let encode = |value| {
        let mut out = Vec::new();
        encode_remaining_length(value, &mut out).expect("in range");
        out
    };
    assert_eq!(encode(127), vec![0x7F]);
    assert_eq!(encode(128), vec![0x80, 0x01]);
    assert_eq!(encode(16_383), vec![0xFF, 0x7F]);
    assert_eq!(encode(16_384), vec![0x80, 0x80, 0x01]);
}
