// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 车流计数 (Traffic Counter)
///
/// 系统架构:
/// 1. 工作线程: 读取画面 → 推理 → 解码/跟踪/计数
/// 2. 主线程:   接收计数事件并打印,结束后输出统计
use std::fs;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use traffic_counter::input::ImageSequence;
use traffic_counter::pipeline::Worker;
use traffic_counter::{Args, CounterConfig, OrtBackend, OrtConfig, OrtEP, VehiclePipeline};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = CounterConfig::load(&args.config);
    config.apply_args(&args);
    config.validate().context("invalid configuration")?;
    config.print_summary();

    info!("🚀 traffic counter starting");
    let backend = OrtBackend::new(&OrtConfig {
        model_path: config.model_path.clone(),
        input_size: config.input_size(),
        ep: if config.use_cuda { OrtEP::Cuda(0) } else { OrtEP::Cpu },
        intra_threads: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
    })?;
    let source = ImageSequence::open(&args.source)?;
    let pipeline = VehiclePipeline::new(&config)?;

    // ========== 启动工作线程 ==========
    let (tx, rx) = crossbeam_channel::bounded(256);
    let mut worker = Worker::new(pipeline, backend, source, config.skip_frames).with_events(tx);
    let stats = worker.stats();
    let handle = thread::spawn(move || worker.run());

    for event in rx.iter() {
        let d = &event.detection;
        match event.previous_type {
            Some(previous) => info!(
                "{} #{} recounted {} -> {} at ({}, {})",
                d.vehicle_type.emoji(),
                d.tracker_id,
                previous,
                d.vehicle_type,
                d.center.x,
                d.center.y
            ),
            None => info!(
                "{} #{} {} at ({}, {}) conf {:.2}",
                d.vehicle_type.emoji(),
                d.tracker_id,
                d.vehicle_type,
                d.center.x,
                d.center.y,
                d.confidence
            ),
        }
    }

    match handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("❌ worker ended with error: {:#}", e),
        Err(_) => anyhow::bail!("worker thread panicked"),
    }

    let stats = stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
    for (vehicle_type, n) in &stats.vehicle_counts {
        info!("  {} {}: {}", vehicle_type.emoji(), vehicle_type, n);
    }
    info!(
        "total {} vehicle(s) in {} frame(s), {:.1} fps",
        stats.total_vehicles, stats.processed_frames, stats.average_fps
    );

    if let Some(path) = &args.stats_json {
        let json = serde_json::to_string_pretty(&stats)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!("💾 statistics saved to {}", path.display());
    }
    Ok(())
}
