// Jaskier Shared Pattern — system monitor
//! Background CPU/memory snapshot task (SPEC_FULL §10.5), grounded in the
//! teacher's `SystemSnapshot`/`sysinfo` pattern. Refreshed on an interval
//! and read by the `/metrics` handler and the watchdog.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;
use tokio::sync::RwLock;

const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SystemSnapshot {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub platform: String,
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 0.0,
            memory_used_mb: 0.0,
            memory_total_mb: 0.0,
            platform: std::env::consts::OS.to_string(),
        }
    }
}

pub fn spawn(snapshot: Arc<RwLock<SystemSnapshot>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sys = System::new_all();
        tracing::info!("system_monitor: started (interval={}s)", REFRESH_INTERVAL.as_secs());

        loop {
            sys.refresh_cpu_usage();
            sys.refresh_memory();

            let cpu_usage_percent = sys.global_cpu_usage();
            let memory_used_mb = sys.used_memory() as f64 / 1024.0 / 1024.0;
            let memory_total_mb = sys.total_memory() as f64 / 1024.0 / 1024.0;

            {
                let mut guard = snapshot.write().await;
                guard.cpu_usage_percent = cpu_usage_percent;
                guard.memory_used_mb = memory_used_mb;
                guard.memory_total_mb = memory_total_mb;
            }

            tokio::time::sleep(REFRESH_INTERVAL).await;
        }
    })
}
