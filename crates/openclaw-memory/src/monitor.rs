//! 一致性巡检
//!
//! 定时扫描监控文件，记录冲突并按阈值升级。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{error, info, warn};

use openclaw_core::Result;

use crate::file_consistency::FileConsistencyChecker;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorStats {
    pub scans: u64,
    pub conflicts_detected: u64,
    pub conflicts_escalated: u64,
    pub last_scan: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

/// 单次巡检结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub detected: Vec<String>,
    pub escalated: Vec<String>,
}

pub struct ConsistencyMonitor {
    checker: Arc<FileConsistencyChecker>,
    scan_interval: Duration,
    stats: Arc<RwLock<MonitorStats>>,
    is_running: Arc<RwLock<bool>>,
}

impl ConsistencyMonitor {
    pub fn new(checker: Arc<FileConsistencyChecker>) -> Self {
        let scan_interval = Duration::from_secs(checker.settings().scan_interval_secs.max(1));
        Self::with_interval(checker, scan_interval)
    }

    pub fn with_interval(checker: Arc<FileConsistencyChecker>, scan_interval: Duration) -> Self {
        Self {
            checker,
            scan_interval,
            stats: Arc::new(RwLock::new(MonitorStats::default())),
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn run_once(&self) -> Result<ScanReport> {
        Self::scan(&self.checker, &self.stats).await
    }

    async fn scan(
        checker: &FileConsistencyChecker,
        stats: &Arc<RwLock<MonitorStats>>,
    ) -> Result<ScanReport> {
        let detected = checker.detect_conflicts().await?;
        let escalated = checker.check_and_escalate_threshold().await?;

        let mut stats = stats.write().await;
        stats.scans += 1;
        stats.conflicts_detected += detected.len() as u64;
        stats.conflicts_escalated += escalated.len() as u64;
        stats.last_scan = Some(checker.clock().now());

        Ok(ScanReport {
            detected: detected.into_iter().map(|c| c.id).collect(),
            escalated,
        })
    }

    pub async fn start(&self) {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            warn!("Consistency monitor is already running");
            return;
        }
        *is_running = true;
        drop(is_running);

        info!(interval = ?self.scan_interval, "Starting consistency monitor");

        let checker = self.checker.clone();
        let stats = self.stats.clone();
        let is_running = self.is_running.clone();
        let scan_interval = self.scan_interval;

        tokio::spawn(async move {
            let mut ticker = interval(scan_interval);

            loop {
                ticker.tick().await;

                if !*is_running.read().await {
                    info!("Consistency monitor stopped");
                    break;
                }

                match Self::scan(&checker, &stats).await {
                    Ok(report) if !report.detected.is_empty() => {
                        info!(
                            "巡检完成: {} 个冲突, {} 个升级",
                            report.detected.len(),
                            report.escalated.len()
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Consistency scan failed: {}", e);
                        let mut stats = stats.write().await;
                        stats.errors.push(e.to_string());
                        if stats.errors.len() > 100 {
                            stats.errors.remove(0);
                        }
                    }
                }
            }
        });
    }

    pub async fn stop(&self) {
        let mut is_running = self.is_running.write().await;
        *is_running = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn get_stats(&self) -> MonitorStats {
        self.stats.read().await.clone()
    }
}
