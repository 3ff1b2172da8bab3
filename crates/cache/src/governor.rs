//! Memory governor policy
//!
//! Pure threshold math deciding how many cached pixmap bytes to release for
//! a given memory profile, from the cache size and the host's total and
//! currently free RAM. Keeping the policy free of state makes the eviction
//! targets directly testable.

/// Cache aggressiveness profiles.
///
/// `Low` keeps almost nothing cached; `Greedy` only yields memory once the
/// cache outgrows both free RAM and half of total RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryProfile {
    Low,
    #[default]
    Normal,
    Aggressive,
    Greedy,
}

/// Bytes the cache should release right now.
///
/// * `Low` — everything.
/// * `Normal` — whatever exceeds a third of total RAM; additionally, when the
///   cache is larger than free RAM, at least half of the overshoot.
/// * `Aggressive` — half of the overshoot past free RAM, if any.
/// * `Greedy` — half of the overshoot past `max(free RAM, total RAM / 2)`.
pub fn bytes_to_free(
    profile: MemoryProfile,
    cached_bytes: u64,
    total_ram: u64,
    free_ram: u64,
) -> u64 {
    let mut target = 0u64;
    let mut clip = 0u64;

    match profile {
        MemoryProfile::Low => target = cached_bytes,
        MemoryProfile::Normal => {
            let third_of_total = total_ram / 3;
            if cached_bytes > third_of_total {
                target = cached_bytes - third_of_total;
            }
            if cached_bytes > free_ram {
                clip = (cached_bytes - free_ram) / 2;
            }
        }
        MemoryProfile::Aggressive => {
            if cached_bytes > free_ram {
                clip = (cached_bytes - free_ram) / 2;
            }
        }
        MemoryProfile::Greedy => {
            let limit = free_ram.max(total_ram / 2);
            if cached_bytes > limit {
                clip = (cached_bytes - limit) / 2;
            }
        }
    }

    target.max(clip)
}

/// Cap on lazily generated text pages kept in memory.
///
/// Scales with total RAM in 512 MiB steps; the per-profile base counts trade
/// re-extraction cost against memory the same way the pixmap thresholds do.
pub fn max_text_pages(profile: MemoryProfile, total_ram: u64) -> usize {
    const HALF_GIB: f64 = 536_870_912.0;
    let multiplier = ((total_ram as f64 / HALF_GIB).round() as usize).max(1);
    let base = match profile {
        MemoryProfile::Low => 2,
        MemoryProfile::Normal => 50,
        MemoryProfile::Aggressive => 250,
        MemoryProfile::Greedy => 1250,
    };
    multiplier * base
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_low_profile_frees_everything() {
        assert_eq!(bytes_to_free(MemoryProfile::Low, 500 * MB, 4 * GB, 2 * GB), 500 * MB);
        assert_eq!(bytes_to_free(MemoryProfile::Low, 0, 4 * GB, 2 * GB), 0);
    }

    #[test]
    fn test_normal_profile_caps_at_third_of_total() {
        // 3 GB total -> 1 GB allowance; 1.5 GB cached frees the 0.5 GB excess.
        let freed = bytes_to_free(MemoryProfile::Normal, 1536 * MB, 3 * GB, 4 * GB);
        assert_eq!(freed, 512 * MB);

        // Under the allowance with plenty of free RAM nothing is freed.
        assert_eq!(bytes_to_free(MemoryProfile::Normal, 512 * MB, 3 * GB, 4 * GB), 0);
    }

    #[test]
    fn test_normal_profile_clips_against_free_ram() {
        // Cache within the total-RAM allowance but bigger than free RAM:
        // the free-RAM clip wins.
        let freed = bytes_to_free(MemoryProfile::Normal, 800 * MB, 4 * GB, 200 * MB);
        assert_eq!(freed, 300 * MB);
    }

    #[test]
    fn test_aggressive_profile_only_reacts_to_free_ram() {
        assert_eq!(bytes_to_free(MemoryProfile::Aggressive, 900 * MB, 1 * GB, 2 * GB), 0);
        let freed = bytes_to_free(MemoryProfile::Aggressive, 900 * MB, 1 * GB, 100 * MB);
        assert_eq!(freed, 400 * MB);
    }

    #[test]
    fn test_greedy_profile_uses_larger_of_free_and_half_total() {
        // Free RAM (3 GB) above half of total (2 GB): limit is 3 GB.
        assert_eq!(bytes_to_free(MemoryProfile::Greedy, 2 * GB, 4 * GB, 3 * GB), 0);

        // Free RAM collapsed: limit falls back to half of total.
        let freed = bytes_to_free(MemoryProfile::Greedy, 3 * GB, 4 * GB, 100 * MB);
        assert_eq!(freed, 512 * MB);
    }

    #[test]
    fn test_freed_bytes_never_exceed_cache() {
        for profile in [
            MemoryProfile::Low,
            MemoryProfile::Normal,
            MemoryProfile::Aggressive,
            MemoryProfile::Greedy,
        ] {
            for cached in [0, 1 * MB, 700 * MB, 5 * GB] {
                let freed = bytes_to_free(profile, cached, 2 * GB, 64 * MB);
                assert!(freed <= cached, "{profile:?} freed {freed} of {cached}");
            }
        }
    }

    #[test]
    fn test_text_page_budget_scales_with_ram() {
        assert_eq!(max_text_pages(MemoryProfile::Low, 512 * MB), 2);
        assert_eq!(max_text_pages(MemoryProfile::Normal, 512 * MB), 50);
        assert_eq!(max_text_pages(MemoryProfile::Normal, 2 * GB), 200);
        assert_eq!(max_text_pages(MemoryProfile::Greedy, 1 * GB), 2500);

        // Tiny hosts still keep at least the base count.
        assert_eq!(max_text_pages(MemoryProfile::Aggressive, 128 * MB), 250);
    }
}
