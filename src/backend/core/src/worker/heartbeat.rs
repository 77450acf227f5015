//! Worker-mode heartbeat client.
//!
//! When this node runs as a remote worker it registers with the master and
//! then heartbeats on an interval, re-registering whenever the master
//! answers 404 (master restarted and lost the membership).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Static identity and wiring for one worker.
#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    pub master_host: String,
    pub master_port: u16,
    pub worker_id: String,
    pub worker_host: String,
    pub worker_port: u16,
    pub queues: Vec<String>,
    pub labels: Vec<String>,
    pub max_running_tasks: u32,
    pub interval: Duration,
}

pub struct HeartbeatClient {
    settings: HeartbeatSettings,
    running_tasks: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatClient {
    pub fn new(settings: HeartbeatSettings, running_tasks: Arc<AtomicU32>) -> Self {
        Self { settings, running_tasks, stop: Arc::new(AtomicBool::new(false)), handle: parking_lot::Mutex::new(None) }
    }

    pub fn start(&self) {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }

        let settings = self.settings.clone();
        let running = Arc::clone(&self.running_tasks);
        let stop = Arc::clone(&self.stop);

        info!(
            master = %format!("{}:{}", settings.master_host, settings.master_port),
            worker_id = %settings.worker_id,
            interval_ms = settings.interval.as_millis() as u64,
            "worker heartbeat client starting"
        );

        *guard = Some(tokio::spawn(async move {
            let base = format!("http://{}:{}", settings.master_host, settings.master_port);
            let client = match reqwest::Client::builder().timeout(Duration::from_secs(5)).build() {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "heartbeat client build failed");
                    return;
                }
            };
            let mut registered = false;

            while !stop.load(Ordering::Acquire) {
                if !registered {
                    let body = json!({
                        "id": settings.worker_id,
                        "host": settings.worker_host,
                        "port": settings.worker_port,
                        "queues": settings.queues,
                        "labels": settings.labels,
                        "running_tasks": running.load(Ordering::Relaxed),
                        "max_running_tasks": settings.max_running_tasks,
                    });
                    match client.post(format!("{base}/api/workers/register")).json(&body).send().await {
                        Ok(resp) if resp.status().is_success() => {
                            info!(worker_id = %settings.worker_id, "worker registered");
                            registered = true;
                        }
                        Ok(resp) => warn!(status = resp.status().as_u16(), "worker register failed"),
                        Err(e) => warn!(error = %e, "worker register failed"),
                    }
                    if !registered {
                        tokio::time::sleep(settings.interval).await;
                        continue;
                    }
                }

                let body = json!({
                    "id": settings.worker_id,
                    "running_tasks": running.load(Ordering::Relaxed),
                });
                match client.post(format!("{base}/api/workers/heartbeat")).json(&body).send().await {
                    Ok(resp) if resp.status().as_u16() == 404 => {
                        // Master no longer knows us; re-register next tick.
                        warn!(worker_id = %settings.worker_id, "master lost registration, will re-register");
                        registered = false;
                    }
                    Ok(resp) if !resp.status().is_success() => {
                        warn!(status = resp.status().as_u16(), "heartbeat rejected");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "heartbeat send failed"),
                }

                tokio::time::sleep(settings.interval).await;
            }
        }));
    }

    pub async fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = self.handle.lock().take();
        if let Some(h) = handle {
            h.abort();
            let _ = h.await;
        }
    }
}
