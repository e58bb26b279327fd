// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use anyhow::Result;
use approx::assert_relative_eq;
use image::{DynamicImage, RgbImage};
use ndarray::{Array, IxDyn};

use traffic_counter::detection::{CountingLine, CountingMethod, CountingMode, Point, Rect};
use traffic_counter::pipeline::{TrafficStatistics, Worker};
use traffic_counter::{
    non_max_suppression, CounterConfig, InferenceBackend, RawCandidate, Tracker, VehicleClass,
    VehiclePipeline,
};

const FRAME_W: u32 = 1280;
const FRAME_H: u32 = 720;

/// classes-first 输出 [1, 9, n]: [cx, cy, w, h, bicycle, bus, car, plate, motorcycle]
fn output(boxes: &[(f32, f32, f32, f32, usize, f32)]) -> Array<f32, IxDyn> {
    let n = boxes.len();
    let mut y = Array::<f32, _>::zeros(IxDyn(&[1, 9, n]));
    for (i, &(cx, cy, w, h, class_id, score)) in boxes.iter().enumerate() {
        y[[0, 0, i]] = cx;
        y[[0, 1, i]] = cy;
        y[[0, 2, i]] = w;
        y[[0, 3, i]] = h;
        y[[0, 4 + class_id, i]] = score;
    }
    y
}

fn line_config() -> CounterConfig {
    CounterConfig {
        counting: CountingMode::Line(CountingLine::new(
            Point::new(0, 360),
            Point::new(1280, 360),
            50.0,
        )),
        ..CounterConfig::default()
    }
}

#[test]
fn nms_keeps_only_the_strongest_of_near_identical_boxes() {
    let mut xs = vec![
        RawCandidate::new(100.0, 100.0, 80.0, 60.0, 2, 0.9),
        RawCandidate::new(101.0, 100.0, 80.0, 60.0, 2, 0.05),
        RawCandidate::new(100.0, 101.0, 80.0, 60.0, 2, 0.88),
    ];
    let before = xs.len();
    non_max_suppression(&mut xs, 0.15, 0.45);
    assert!(xs.len() <= before);
    assert_eq!(xs.len(), 1);
    assert_relative_eq!(xs[0].confidence(), 0.9);
}

#[test]
fn iou_properties() {
    let a = Rect::new(10, 20, 100, 80);
    let b = Rect::new(60, 40, 100, 80);
    let c = Rect::new(500, 500, 10, 10);
    assert_relative_eq!(a.iou(&a), 1.0);
    assert_relative_eq!(a.iou(&b), b.iou(&a));
    assert!((0.0..=1.0).contains(&a.iou(&b)));
    assert_relative_eq!(a.iou(&c), 0.0);
}

#[test]
fn relabel_scenario_car_to_bus_in_first_pass() {
    let mut tracker = Tracker::new();
    let t0 = Instant::now();
    let first = Rect::new(200, 200, 200, 100);
    let id = tracker.match_or_create_at(first.center(), first, VehicleClass::Car, 0.6, t0);
    tracker.evict_stale_at(t0);
    tracker.match_or_create_at(first.center(), first, VehicleClass::Car, 0.6, t0);
    tracker.evict_stale_at(t0);

    // IOU 20000/28000 ≈ 0.71, 中心相距 80px
    let grown = Rect::new(200, 200, 280, 100);
    let center = Point::new(first.center().x + 80, first.center().y);
    assert_relative_eq!(grown.iou(&first), 20000.0 / 28000.0, epsilon = 1e-9);

    let matched = tracker.match_or_create_at(center, grown, VehicleClass::Bus, 0.6, t0);
    assert_eq!(matched, id);
    assert_eq!(tracker.final_type(id), VehicleClass::Bus);
    assert_eq!(tracker.get(id).map(|t| t.type_changes()), Some(1));
    assert_eq!(tracker.final_type(id), tracker.final_type(id));
}

#[test]
fn line_crossing_fires_exactly_once() {
    let mut tracker = Tracker::new();
    let t0 = Instant::now();
    let (start, end) = (Point::new(0, 100), Point::new(640, 100));

    let mut fired = 0;
    for (i, y) in [90, 110, 130, 110, 90].iter().enumerate() {
        let bbox = Rect::new(300, y - 10, 40, 20);
        let t = t0 + Duration::from_millis(30 * i as u64);
        let id = tracker.match_or_create_at(bbox.center(), bbox, VehicleClass::Car, 0.7, t);
        assert_eq!(id, 1);
        if tracker.check_line_crossing(id, start, end, 50.0) {
            fired += 1;
        }
        tracker.evict_stale_at(t);
    }
    assert_eq!(fired, 1);
}

#[test]
fn region_pipeline_counts_each_vehicle_once() {
    let mut pipeline = VehiclePipeline::new(&CounterConfig::default()).unwrap();
    let t0 = Instant::now();
    let mut stats = TrafficStatistics::default();

    for i in 0..5 {
        let dx = 12.0 * i as f32;
        let y = output(&[
            (300.0 + dx, 400.0, 160.0, 100.0, 2, 0.62),
            (900.0 - dx, 200.0, 40.0, 60.0, 4, 0.55),
        ]);
        let now = t0 + Duration::from_millis(40 * i);
        let out = pipeline.process_tensor_at(&y, FRAME_W, FRAME_H, now);
        assert_eq!(out.detections.len(), 2);
        for event in &out.events {
            stats.record(event);
        }
    }

    assert_eq!(stats.total_vehicles, 2);
    assert_eq!(stats.count(VehicleClass::Car), 1);
    assert_eq!(stats.count(VehicleClass::Motorcycle), 1);
    assert_eq!(pipeline.tracker().len(), 2);
}

#[test]
fn bus_upgrade_moves_count_between_types() {
    let mut config = CounterConfig::default();
    config.enable_refinement = false;
    let mut pipeline = VehiclePipeline::new(&config).unwrap();
    let t0 = Instant::now();
    let mut stats = TrafficStatistics::default();

    let frames = [
        output(&[(400.0, 300.0, 200.0, 100.0, 2, 0.6)]),
        output(&[(410.0, 300.0, 220.0, 100.0, 1, 0.6)]),
        output(&[(420.0, 300.0, 220.0, 100.0, 1, 0.6)]),
    ];
    let mut methods = Vec::new();
    for (i, y) in frames.iter().enumerate() {
        let now = t0 + Duration::from_millis(40 * i as u64);
        let out = pipeline.process_tensor_at(y, FRAME_W, FRAME_H, now);
        for event in &out.events {
            methods.push(event.method);
            stats.record(event);
        }
    }

    assert_eq!(methods, vec![CountingMethod::Region, CountingMethod::Region]);
    assert_eq!(stats.total_vehicles, 1);
    assert_eq!(stats.count(VehicleClass::Car), 0);
    assert_eq!(stats.count(VehicleClass::Bus), 1);
    let sum: u64 = stats.vehicle_counts.values().sum();
    assert_eq!(sum, stats.total_vehicles);
}

#[test]
fn stale_tracks_are_evicted_and_ids_not_reused() {
    let mut pipeline = VehiclePipeline::new(&line_config()).unwrap();
    let t0 = Instant::now();
    let car = output(&[(300.0, 200.0, 160.0, 100.0, 2, 0.6)]);

    let first = pipeline.process_tensor_at(&car, FRAME_W, FRAME_H, t0);
    assert_eq!(first.detections[0].tracker_id, 1);

    // 单帧轨迹 0.5s 后被当作误检清理
    let empty = output(&[]);
    pipeline.process_tensor_at(&empty, FRAME_W, FRAME_H, t0 + Duration::from_millis(600));
    assert!(pipeline.tracker().is_empty());

    let again = pipeline.process_tensor_at(&car, FRAME_W, FRAME_H, t0 + Duration::from_millis(700));
    assert_eq!(again.detections[0].tracker_id, 2);
}

/// 每帧向下移动的汽车,穿过 y=360 的计数线
struct MovingCar {
    frame: usize,
}

impl InferenceBackend for MovingCar {
    fn input_size(&self) -> (u32, u32) {
        (64, 64)
    }

    fn run(&mut self, _input: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
        let cy = 280.0 + 20.0 * self.frame as f32;
        self.frame += 1;
        Ok(vec![output(&[(640.0, cy, 160.0, 100.0, 2, 0.7)])])
    }
}

#[test]
fn worker_counts_line_crossing_from_mock_backend() {
    let frames: VecDeque<DynamicImage> = (0..8)
        .map(|_| DynamicImage::ImageRgb8(RgbImage::new(FRAME_W, FRAME_H)))
        .collect();
    let pipeline = VehiclePipeline::new(&line_config()).unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut worker = Worker::new(pipeline, MovingCar { frame: 0 }, frames, 0).with_events(tx);
    let stats = worker.stats();
    worker.run().unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].method, CountingMethod::Line);
    assert_eq!(events[0].detection.vehicle_type, VehicleClass::Car);

    let stats = stats.lock().unwrap();
    assert_eq!(stats.processed_frames, 8);
    assert_eq!(stats.total_vehicles, 1);
    assert_eq!(stats.count(VehicleClass::Car), 1);
}
