// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 工作线程 (Worker)
//! 职责: 拉取画面 → 流水线处理 → 更新统计 → 发送计数事件

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;
use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, error, info, warn};

use super::{CountEvent, TrafficStatistics, VehiclePipeline};
use crate::input::FrameSource;
use crate::models::InferenceBackend;

/// 暂停时的轮询间隔
const PAUSE_POLL: Duration = Duration::from_millis(100);
/// 启动后超过该时间仍未计数则提示
const NO_COUNT_WARNING: Duration = Duration::from_secs(10);

/// 工作线程控制 (跨线程共享)
#[derive(Debug, Default)]
pub struct WorkerControl {
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl WorkerControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// 锁被毒化时仍然读取统计
fn lock_stats(stats: &Mutex<TrafficStatistics>) -> MutexGuard<'_, TrafficStatistics> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Worker<B, S> {
    pipeline: VehiclePipeline,
    backend: B,
    source: S,
    skip_frames: u32,
    control: Arc<WorkerControl>,
    stats: Arc<Mutex<TrafficStatistics>>,
    events: Option<Sender<CountEvent>>,

    // FPS统计
    count: u64,
    last: Instant,
    current_fps: f64,
}

impl<B: InferenceBackend, S: FrameSource> Worker<B, S> {
    pub fn new(pipeline: VehiclePipeline, backend: B, source: S, skip_frames: u32) -> Self {
        Self {
            pipeline,
            backend,
            source,
            skip_frames,
            control: Arc::new(WorkerControl::default()),
            stats: Arc::new(Mutex::new(TrafficStatistics::default())),
            events: None,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
        }
    }

    /// 计数事件同时发送到通道 (try_send,不阻塞)
    pub fn with_events(mut self, sender: Sender<CountEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn control(&self) -> Arc<WorkerControl> {
        Arc::clone(&self.control)
    }

    pub fn stats(&self) -> Arc<Mutex<TrafficStatistics>> {
        Arc::clone(&self.stats)
    }

    pub fn pipeline(&self) -> &VehiclePipeline {
        &self.pipeline
    }

    /// 运行到画面结束或被停止; 画面源出错时结束并返回错误
    pub fn run(&mut self) -> Result<()> {
        info!("🔍 worker started (skip {} frame(s))", self.skip_frames);
        self.backend.summary();

        let started = Instant::now();
        *lock_stats(&self.stats) = TrafficStatistics::new(Local::now());
        self.count = 0;
        self.last = started;

        let mut frame_index: u64 = 0;
        let mut warned = false;
        let mut result = Ok(());

        loop {
            if self.control.is_stopped() {
                info!("worker stopped");
                break;
            }
            if self.control.is_paused() {
                thread::sleep(PAUSE_POLL);
                continue;
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("end of stream after {} frame(s)", frame_index);
                    break;
                }
                Err(e) => {
                    error!("❌ frame source failed: {:#}", e);
                    result = Err(e);
                    break;
                }
            };
            let index = frame_index;
            frame_index += 1;

            // 每 (skip+1) 帧处理1帧
            if index % (self.skip_frames as u64 + 1) != 0 {
                continue;
            }

            let outcome = self.pipeline.process_frame(&mut self.backend, &frame);
            self.update_fps();
            debug!(
                "frame {}: {} detection(s), {} count(s)",
                index,
                outcome.detections.len(),
                outcome.events.len()
            );

            let total = {
                let mut stats = lock_stats(&self.stats);
                stats.processed_frames += 1;
                stats.current_fps = self.current_fps;
                for event in &outcome.events {
                    stats.record(event);
                }
                stats.total_vehicles
            };

            if let Some(sender) = &self.events {
                for event in outcome.events {
                    match sender.try_send(event) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("count event channel full, event dropped")
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            debug!("count event receiver gone");
                            break;
                        }
                    }
                }
            }

            if !warned && total == 0 && started.elapsed() >= NO_COUNT_WARNING {
                warn!(
                    "⚠️ no vehicle counted after {}s, check the counting zone/line and the class map",
                    NO_COUNT_WARNING.as_secs()
                );
                warned = true;
            }
        }

        let mut stats = lock_stats(&self.stats);
        stats.finish(Local::now(), started.elapsed().as_secs_f64());
        info!(
            "✅ worker finished: {} frame(s), {} vehicle(s), {:.1} fps",
            stats.processed_frames, stats.total_vehicles, stats.average_fps
        );
        result
    }

    /// 每秒更新一次当前FPS
    fn update_fps(&mut self) {
        self.count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        if elapsed.as_secs() >= 1 {
            self.current_fps = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.last = now;
        }
    }
}
