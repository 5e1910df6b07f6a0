// src/utils/system.rs: System functions

use std::time::Duration;

use anyhow::{anyhow, Result};
use log::warn;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::time::sleep;

const GIB: u64 = 1_073_741_824;


/// Determines number of cores that can be used for each tool job
///
/// # Arguments
///
/// * `args_threads` - Optional user ceiling.
///
/// # Returns
///
/// Result<usize, f32> maximum cores, current cpu usage
pub async fn detect_cores_and_load(args_threads: Option<usize>) -> Result<(usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(Default::default());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_all();
    let physical_cores = System::physical_core_count().unwrap_or_else(num_cpus::get_physical);
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    sleep(Duration::from_millis(100)).await;
    let cpu_load = system.global_cpu_usage();
    let max_cores = match args_threads {
        Some(threads) => threads.max(1),
        None => physical_cores.max(1),
    };
    Ok((max_cores, cpu_load))
}


/// Threads per tool job. Concurrent jobs share the detected cores; the user's
/// `--threads` is honoured as given.
pub fn compute_job_threads(max_cores: usize, cpu_load: f32, max_jobs: usize, user_threads: Option<usize>) -> usize {
    if let Some(threads) = user_threads {
        return threads.max(1);
    }
    let usable = if cpu_load > 50.0 { max_cores / 2 } else { max_cores };
    (usable / max_jobs.max(1)).max(1)
}


/// Finds the amount of total and available RAM, keyed to OS
///
/// # Returns
///
/// Result<u64, u64> total ram, available ram
pub fn detect_ram() -> Result<(u64, u64)> {
    let (total_ram, available_ram) = if cfg!(target_os = "macos") {
        let refresh_kind = RefreshKind::nothing().with_memory(Default::default());
        let mut system = System::new_with_specifics(refresh_kind);
        system.refresh_memory_specifics(MemoryRefreshKind::everything());
        let total = system.total_memory();
        let used = system.used_memory();
        (total, total.saturating_sub(used))
    } else {
        let mut system = System::new_all();
        system.refresh_memory();
        (system.total_memory(), system.available_memory())
    };

    if total_ram == 0 || available_ram == 0 {
        return Err(anyhow!("Failed to detect valid RAM values"));
    }

    Ok((total_ram, available_ram))
}


/// Memory ceiling per tool job in bytes.
///
/// # Arguments
///
/// * `available_ram` - Usable RAM in bytes.
/// * `max_jobs` - Concurrent job quota.
/// * `user_gb` - Optional per-job ceiling from `--max_memory_gb`.
pub fn compute_job_memory(available_ram: u64, max_jobs: usize, user_gb: Option<u64>) -> u64 {
    let share = available_ram / max_jobs.max(1) as u64;
    match user_gb {
        Some(gb) => {
            let requested = gb.saturating_mul(GIB);
            if requested > share {
                warn!(
                    "Requested {} GiB per job exceeds the available share of ~{} GiB across {} jobs",
                    gb,
                    share / GIB,
                    max_jobs
                );
            }
            requested
        }
        None => share,
    }
}
