use log::debug;

/// 最小并发度
const MIN_LEVEL: usize = 1;
/// 最大并发度
const MAX_LEVEL: usize = 4;
/// 内存下界，低于此值时并发度取最小
const LOW_MB: u64 = 800;
/// 内存上界，高于此值时并发度取最大
const HIGH_MB: u64 = 1600;

/// 可用内存探针
pub trait MemoryProbe: Send + Sync {
    /// 当前可用内存，MB；无法探测时返回 None
    fn available_mb(&self) -> Option<u64>;
}

/// 默认探针，读取 /proc/meminfo 的 MemAvailable 字段
pub struct MeminfoProbe;

impl MemoryProbe for MeminfoProbe {
    fn available_mb(&self) -> Option<u64> {
        #[cfg(target_os = "linux")]
        {
            let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
            for line in meminfo.lines() {
                if let Some(rest) = line.strip_prefix("MemAvailable:") {
                    let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
                    return Some(kb / 1024);
                }
            }
            None
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}

/// 根据可用内存决定批内嵌入生成的并发度
///
/// 在 LOW_MB..HIGH_MB 区间内于 MIN_LEVEL..MAX_LEVEL 之间线性插值，
/// 两端截断；无法探测内存时退化为按 CPU 核数截断
pub struct ConcurrencyGovernor {
    probe: Box<dyn MemoryProbe>,
}

impl Default for ConcurrencyGovernor {
    fn default() -> Self {
        Self::new(Box::new(MeminfoProbe))
    }
}

impl ConcurrencyGovernor {
    pub fn new(probe: Box<dyn MemoryProbe>) -> Self {
        Self { probe }
    }

    /// 当前允许的并发度，范围 [1, 4]
    pub fn level(&self) -> usize {
        let level = match self.probe.available_mb() {
            Some(mb) => interpolate(mb),
            None => num_cpus::get().clamp(MIN_LEVEL, MAX_LEVEL),
        };
        debug!("concurrency level: {}", level);
        level
    }
}

fn interpolate(available_mb: u64) -> usize {
    if available_mb <= LOW_MB {
        return MIN_LEVEL;
    }
    if available_mb >= HIGH_MB {
        return MAX_LEVEL;
    }
    let span = (HIGH_MB - LOW_MB) as f64;
    let offset = (available_mb - LOW_MB) as f64;
    let level = MIN_LEVEL as f64 + offset / span * (MAX_LEVEL - MIN_LEVEL) as f64;
    (level.round() as usize).clamp(MIN_LEVEL, MAX_LEVEL)
}
