use core::fmt;

/// 缓存命中统计，只增不减
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub read_hit: u64,
    pub read_miss: u64,
    pub write_hit: u64,
    pub write_miss: u64,
}

impl Stats {
    pub fn reads(&self) -> u64 {
        self.read_hit + self.read_miss
    }

    pub fn writes(&self) -> u64 {
        self.write_hit + self.write_miss
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#read hits:    {}", self.read_hit)?;
        writeln!(f, "#read misses:  {}", self.read_miss)?;
        writeln!(f, "#write hits:   {}", self.write_hit)?;
        write!(f, "#write misses: {}", self.write_miss)
    }
}
