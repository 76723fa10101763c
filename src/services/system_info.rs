//! One-shot system snapshot (CPU, memory, root disk, uptime) via sysinfo.

use crate::error::PopupError;
use capy_tasks::CancellationToken;
use log::debug;
use std::path::Path;
use std::thread;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, System};

#[derive(Debug, Clone, PartialEq)]
pub struct SystemSnapshot {
    /// CPU brand string (e.g. "AMD Ryzen 7 7840U")
    pub cpu_model: String,
    /// Number of physical CPU cores
    pub cpu_cores: usize,
    // percentage (0.0 - 100.0)
    pub cpu_usage: f32,
    // in bytes
    pub mem_used: u64,
    // in bytes
    pub mem_total: u64,
    // in bytes, root filesystem
    pub disk_used: u64,
    // in bytes, root filesystem
    pub disk_total: u64,
    pub uptime_secs: u64,
    pub host: String,
    pub os: String,
}

impl SystemSnapshot {
    pub fn mem_fraction(&self) -> f32 {
        fraction(self.mem_used, self.mem_total)
    }

    pub fn disk_fraction(&self) -> f32 {
        fraction(self.disk_used, self.disk_total)
    }
}

/// Collect a snapshot. Blocks for the CPU sampling interval.
pub fn collect(token: &CancellationToken) -> Result<SystemSnapshot, PopupError> {
    let mut sys = System::new();

    // CPU usage needs two samples
    sys.refresh_cpu_specifics(CpuRefreshKind::everything());
    thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    token.check()?;
    sys.refresh_cpu_usage();

    sys.refresh_memory_specifics(MemoryRefreshKind::new().with_ram());

    let cpu_model = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| "Unknown".into());
    let cpu_cores = sys.physical_core_count().unwrap_or(sys.cpus().len());

    token.check()?;
    let (disk_used, disk_total) = root_disk_usage();

    let snapshot = SystemSnapshot {
        cpu_model,
        cpu_cores,
        cpu_usage: sys.global_cpu_usage(),
        mem_used: sys.used_memory(),
        mem_total: sys.total_memory(),
        disk_used,
        disk_total,
        uptime_secs: System::uptime(),
        host: System::host_name().unwrap_or_else(|| "Unknown".into()),
        os: System::long_os_version().unwrap_or_else(|| "Unknown".into()),
    };
    debug!("Collected system snapshot: {:?}", snapshot);
    Ok(snapshot)
}

fn root_disk_usage() -> (u64, u64) {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .map(|disk| {
            let total = disk.total_space();
            (total.saturating_sub(disk.available_space()), total)
        })
        .unwrap_or((0, 0))
}

fn fraction(used: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SystemSnapshot {
        SystemSnapshot {
            cpu_model: "Test CPU".into(),
            cpu_cores: 8,
            cpu_usage: 12.5,
            mem_used: 4 * 1024 * 1024 * 1024,
            mem_total: 16 * 1024 * 1024 * 1024,
            disk_used: 0,
            disk_total: 0,
            uptime_secs: 3600,
            host: "capy".into(),
            os: "Linux".into(),
        }
    }

    #[test]
    fn test_fractions() {
        let snap = snapshot();
        assert!((snap.mem_fraction() - 0.25).abs() < f32::EPSILON);
        assert_eq!(snap.disk_fraction(), 0.0);
    }

    #[test]
    fn test_collect_stops_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(collect(&token), Err(PopupError::Cancelled(_))));
    }
}
