use sysinfo::System;

/// One reading of host utilisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSample {
    pub cpu_percent: f32,
    pub mem_percent: f32,
    pub uptime_seconds: u64,
}

impl HostSample {
    /// Whole percentages as the heartbeat carries them.
    pub fn rounded(&self) -> (i32, i32) {
        (to_whole_percent(self.cpu_percent), to_whole_percent(self.mem_percent))
    }
}

fn to_whole_percent(value: f32) -> i32 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as i32
}

/// Keeps a `System` between samples; CPU usage is a delta between two refreshes.
pub struct HostMetrics {
    sys: System,
}

impl Default for HostMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMetrics {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self { sys }
    }

    pub fn sample(&mut self) -> HostSample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let total = self.sys.total_memory();
        let mem_percent = if total > 0 {
            (self.sys.used_memory() as f64 / total as f64 * 100.0) as f32
        } else {
            0.0
        };
        HostSample {
            cpu_percent: self.sys.global_cpu_usage(),
            mem_percent,
            uptime_seconds: System::uptime(),
        }
    }
}
