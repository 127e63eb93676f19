// Background sampling for slow or streaming sensors
//
// A worker thread reads the device continuously and keeps only the latest
// sample, so measurements never block on the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::config::SAMPLER_RETRY_INTERVAL;
use crate::error::{PlatformError, Result};
use crate::lock;
use crate::sensors::RawSensor;

pub struct BackgroundSampler {
    name: String,
    channel_count: usize,
    latest: Arc<Mutex<Option<Vec<f64>>>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundSampler {
    /// Move `device` onto a sampling thread
    pub fn spawn<S: RawSensor + 'static>(name: &str, mut device: S) -> Result<Self> {
        let channel_count = device.channel_count();
        let latest = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let latest = Arc::clone(&latest);
            let shutdown = Arc::clone(&shutdown);
            let name = name.to_string();
            thread::Builder::new()
                .name(format!("{}-sampler", name))
                .spawn(move || {
                    debug!("{} sampler started", name);
                    while !shutdown.load(Ordering::Acquire) {
                        match device.measure_raw() {
                            Ok(sample) => *lock(&latest) = Some(sample),
                            Err(e) => {
                                warn!("{} sampler read failed: {}", name, e);
                                thread::sleep(SAMPLER_RETRY_INTERVAL);
                            }
                        }
                    }
                    debug!("{} sampler stopped", name);
                })?
        };

        Ok(Self {
            name: name.to_string(),
            channel_count,
            latest,
            shutdown,
            worker: Some(worker),
        })
    }

    pub fn has_sample(&self) -> bool {
        lock(&self.latest).is_some()
    }
}

impl RawSensor for BackgroundSampler {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn measure_raw(&mut self) -> Result<Vec<f64>> {
        lock(&self.latest)
            .clone()
            .ok_or_else(|| PlatformError::Device(format!("no {} sample received yet", self.name)))
    }
}

impl Drop for BackgroundSampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("{} sampler thread panicked", self.name);
            }
        }
    }
}
