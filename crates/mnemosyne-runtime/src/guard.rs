//! Resource guard: answers "is it safe to run heavy inference right now?"
//!
//! Admission fails closed: when GPU telemetry is unavailable the vision
//! model is denied, and a blacklisted foreground workload (games, renderers,
//! VMs) pauses the whole loop.

use std::sync::Mutex;

use sysinfo::System;

/// Process names that indicate the machine is busy with the user's own
/// heavy workload.
const PROCESS_BLACKLIST: [&str; 25] = [
    // Steam titles
    "cs2.exe",
    "dota2.exe",
    "csgo.exe",
    "rust.exe",
    "valheim.exe",
    "eldenring.exe",
    "cyberpunk2077.exe",
    "gta5.exe",
    "gta_v.exe",
    // Epic / Origin / Uplay titles
    "fortnite.exe",
    "apex.exe",
    "battlefield.exe",
    "cod.exe",
    "blackops4.exe",
    // Content creation
    "blender.exe",
    "maya.exe",
    "3dsmax.exe",
    "afterfx.exe",
    "premiere.exe",
    "resolve.exe",
    "unity.exe",
    "unrealeditor.exe",
    // Virtualization
    "vmware.exe",
    "virtualbox.exe",
    "qemu-system-x86_64.exe",
];

/// GPU free-memory probe. `None` means telemetry is unavailable, which the
/// guard treats as a denial.
pub trait GpuTelemetry: Send + Sync {
    fn free_bytes(&self) -> Option<u64>;

    fn shutdown(&self) {}
}

/// Telemetry over an `nvidia-smi` subprocess. Hosts without the tool (or
/// without an NVIDIA GPU) report `None`.
#[derive(Debug, Default)]
pub struct NvidiaSmiTelemetry;

impl GpuTelemetry for NvidiaSmiTelemetry {
    fn free_bytes(&self) -> Option<u64> {
        let output = std::process::Command::new("nvidia-smi")
            .args(["--query-gpu=memory.free", "--format=csv,noheader,nounits"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let free_mib: u64 = text.lines().next()?.trim().parse().ok()?;
        Some(free_mib * 1024 * 1024)
    }
}

/// Running-process probe, separated from the guard for testability.
pub trait ProcessScanner: Send + Sync {
    fn running_names(&self) -> Vec<String>;
}

struct SysinfoScanner {
    system: Mutex<System>,
}

impl SysinfoScanner {
    fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl ProcessScanner for SysinfoScanner {
    fn running_names(&self) -> Vec<String> {
        let mut system = self.system.lock().expect("process scanner lock");
        system.refresh_processes();
        system
            .processes()
            .values()
            .map(|process| process.name().to_lowercase())
            .collect()
    }
}

pub struct SystemGuard {
    telemetry: Box<dyn GpuTelemetry>,
    scanner: Box<dyn ProcessScanner>,
    vram_threshold_bytes: u64,
}

impl SystemGuard {
    /// Guard with the default backends and a threshold in MiB.
    pub fn new(vram_threshold_mb: u64) -> Self {
        Self::with_backends(
            Box::new(NvidiaSmiTelemetry),
            Box::new(SysinfoScanner::new()),
            vram_threshold_mb,
        )
    }

    pub fn with_backends(
        telemetry: Box<dyn GpuTelemetry>,
        scanner: Box<dyn ProcessScanner>,
        vram_threshold_mb: u64,
    ) -> Self {
        Self {
            telemetry,
            scanner,
            vram_threshold_bytes: vram_threshold_mb * 1024 * 1024,
        }
    }

    pub fn free_gpu_bytes(&self) -> Option<u64> {
        self.telemetry.free_bytes()
    }

    /// Enough free VRAM for the vision model? Telemetry failure denies.
    pub fn can_run_vision_model(&self) -> bool {
        match self.free_gpu_bytes() {
            Some(free) if free >= self.vram_threshold_bytes => true,
            Some(free) => {
                tracing::warn!(
                    free_mb = free / 1024 / 1024,
                    threshold_mb = self.vram_threshold_bytes / 1024 / 1024,
                    "insufficient VRAM, denying vision model"
                );
                false
            }
            None => {
                tracing::warn!("VRAM telemetry unavailable, denying vision model");
                false
            }
        }
    }

    /// Arbitrary-threshold VRAM check used by individual perception steps.
    pub fn check_available(&self, threshold_mb: u64) -> bool {
        self.free_gpu_bytes()
            .is_some_and(|free| free >= threshold_mb * 1024 * 1024)
    }

    /// True when no blacklisted process is running.
    pub fn is_user_active(&self) -> bool {
        let running = self.scanner.running_names();
        for name in &running {
            if PROCESS_BLACKLIST.contains(&name.as_str()) {
                tracing::info!(process = %name, "blacklisted process detected, pausing");
                return false;
            }
        }
        true
    }

    /// Gate for the periodic loop: VRAM headroom and no competing workload.
    pub fn safe_to_run(&self) -> bool {
        let vram_ok = self.can_run_vision_model();
        let user_ok = self.is_user_active();
        vram_ok && user_ok
    }

    pub fn shutdown(&self) {
        self.telemetry.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTelemetry(Option<u64>);

    impl GpuTelemetry for FixedTelemetry {
        fn free_bytes(&self) -> Option<u64> {
            self.0
        }
    }

    struct FixedScanner(Vec<String>);

    impl ProcessScanner for FixedScanner {
        fn running_names(&self) -> Vec<String> {
            self.0.clone()
        }
    }

    fn guard(free_bytes: Option<u64>, processes: &[&str]) -> SystemGuard {
        SystemGuard::with_backends(
            Box::new(FixedTelemetry(free_bytes)),
            Box::new(FixedScanner(processes.iter().map(|p| p.to_string()).collect())),
            4096,
        )
    }

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn three_gib_free_denies_vision_model() {
        let guard = guard(Some(3 * GIB), &[]);
        assert!(!guard.can_run_vision_model());
        assert!(!guard.safe_to_run());
    }

    #[test]
    fn five_gib_free_admits_vision_model() {
        let guard = guard(Some(5 * GIB), &[]);
        assert!(guard.can_run_vision_model());
        assert!(guard.safe_to_run());
    }

    #[test]
    fn missing_telemetry_fails_closed() {
        let guard = guard(None, &[]);
        assert_eq!(guard.free_gpu_bytes(), None);
        assert!(!guard.can_run_vision_model());
        assert!(!guard.check_available(1));
    }

    #[test]
    fn check_available_uses_given_threshold() {
        let guard = guard(Some(3 * GIB), &[]);
        assert!(guard.check_available(2048));
        assert!(!guard.check_available(4096));
    }

    #[test]
    fn blacklisted_process_pauses_loop() {
        let guard = guard(Some(8 * GIB), &["explorer.exe", "cs2.exe"]);
        assert!(!guard.is_user_active());
        assert!(!guard.safe_to_run());
    }

    #[test]
    fn ordinary_processes_do_not_pause() {
        let guard = guard(Some(8 * GIB), &["explorer.exe", "code.exe"]);
        assert!(guard.is_user_active());
    }
}
