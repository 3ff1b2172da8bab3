//! Host memory probing
//!
//! Platform-specific readers for total and currently free RAM. Total RAM is
//! immutable and cached for the process lifetime; free RAM is refreshed at
//! most every two seconds so the memory governor can run on hot paths
//! without hammering the kernel. Platforms without a supported probe report
//! 128 MiB total and nothing free, which pushes the governor into its most
//! conservative behavior.

use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Total RAM reported when no platform probe is available.
const FALLBACK_TOTAL: u64 = 128 * 1024 * 1024;

/// How long a free-RAM reading stays valid.
const FREE_RAM_TTL: Duration = Duration::from_secs(2);

/// Source of host memory figures.
///
/// The document core only ever consumes this trait, so tests can substitute
/// a [`FixedMemory`] with hand-picked numbers.
pub trait MemoryProbe: Send {
    /// Total physical RAM in bytes.
    fn total_ram(&self) -> u64;

    /// Currently free RAM in bytes. Filesystem caches and buffers count as
    /// free where the platform exposes them; used swap counts as used.
    fn free_ram(&self) -> u64;
}

/// The real host probe.
pub struct SystemMemory {
    total: OnceLock<u64>,
    free: Mutex<Option<(Instant, u64)>>,
}

impl SystemMemory {
    pub fn new() -> Self {
        Self { total: OnceLock::new(), free: Mutex::new(None) }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemory {
    fn total_ram(&self) -> u64 {
        *self.total.get_or_init(|| platform::total_ram().unwrap_or(FALLBACK_TOTAL))
    }

    fn free_ram(&self) -> u64 {
        let mut cached = match self.free.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((at, value)) = *cached {
            if at.elapsed() <= FREE_RAM_TTL {
                return value;
            }
        }
        let value = platform::free_ram().unwrap_or(0);
        *cached = Some((Instant::now(), value));
        value
    }
}

/// Probe with fixed readings, for tests and headless tooling.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory {
    pub total: u64,
    pub free: u64,
}

impl FixedMemory {
    pub fn new(total: u64, free: u64) -> Self {
        Self { total, free }
    }
}

impl MemoryProbe for FixedMemory {
    fn total_ram(&self) -> u64 {
        self.total
    }

    fn free_ram(&self) -> u64 {
        self.free
    }
}

#[cfg(target_os = "linux")]
mod platform {
    /// Sum of the given /proc/meminfo fields, in bytes. Values in the file
    /// are kibibytes; fields listed in `negative` are subtracted.
    fn meminfo_sum(positive: &[&str], negative: &[&str]) -> Option<i64> {
        let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
        let mut sum: i64 = 0;
        let mut seen = false;
        for line in contents.lines() {
            let mut parts = line.split_whitespace();
            let Some(label) = parts.next() else { continue };
            let sign = if positive.contains(&label) {
                1
            } else if negative.contains(&label) {
                -1
            } else {
                continue;
            };
            if let Some(kb) = parts.next().and_then(|v| v.parse::<i64>().ok()) {
                sum += sign * kb * 1024;
                seen = true;
            }
        }
        seen.then_some(sum)
    }

    pub fn total_ram() -> Option<u64> {
        if let Some(total) = meminfo_sum(&["MemTotal:"], &[]) {
            return Some(total.max(0) as u64);
        }
        // /proc may be unavailable in minimal containers; ask the kernel
        // directly.
        let mut info = std::mem::MaybeUninit::<libc::sysinfo>::uninit();
        let rc = unsafe { libc::sysinfo(info.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        let info = unsafe { info.assume_init() };
        Some((info.totalram as u64).saturating_mul(info.mem_unit as u64))
    }

    pub fn free_ram() -> Option<u64> {
        let free = meminfo_sum(
            &["MemFree:", "Buffers:", "Cached:", "SwapFree:"],
            &["SwapTotal:"],
        )?;
        Some(free.max(0) as u64)
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use std::ffi::CString;
    use std::mem::size_of;
    use std::ptr;

    fn sysctl_u64(name: &str) -> Option<u64> {
        let key = CString::new(name).ok()?;
        let mut value: u64 = 0;
        let mut len = size_of::<u64>();
        let rc = unsafe {
            libc::sysctlbyname(
                key.as_ptr(),
                &mut value as *mut u64 as *mut libc::c_void,
                &mut len,
                ptr::null_mut(),
                0,
            )
        };
        (rc == 0 && len == size_of::<u64>()).then_some(value)
    }

    pub fn total_ram() -> Option<u64> {
        sysctl_u64("hw.memsize")
    }

    pub fn free_ram() -> Option<u64> {
        // Inactive pages are reclaimable, so they count as free.
        let page_size = sysctl_u64("hw.pagesize")?;
        let free = sysctl_u64("vm.page_free_count")?;
        Some(free.saturating_mul(page_size))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod platform {
    pub fn total_ram() -> Option<u64> {
        None
    }

    pub fn free_ram() -> Option<u64> {
        None
    }
}
