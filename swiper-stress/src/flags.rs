use clap::Parser;

use swiper::{HeapFlags, MemSize};

#[derive(Parser)]
#[command(name = "swiper-stress", version, about = "Stress and diagnostic driver for the swiper collector")]
pub struct Cli {
    /// Scenario to run (promote, churn, graphs, limit, all)
    #[arg(default_value = "all")]
    pub scenario: String,

    /// Number of iterations per scenario
    #[arg(long, default_value_t = 4)]
    pub iterations: usize,

    /// Set maximum heap size
    #[arg(long, value_parser = parse_mem_size)]
    pub max_heap_size: Option<MemSize>,

    /// Set minimum heap size
    #[arg(long, value_parser = parse_mem_size)]
    pub min_heap_size: Option<MemSize>,

    /// Use fixed size for young generation
    #[arg(long, value_parser = parse_mem_size)]
    pub young_size: Option<MemSize>,

    /// Verify heap before and after collections
    #[arg(long)]
    pub gc_verify: bool,

    /// Verbose GC
    #[arg(long)]
    pub gc_verbose: bool,

    /// Print GC statistics
    #[arg(long)]
    pub gc_stats: bool,

    /// Collect garbage at every allocation
    #[arg(long)]
    pub gc_stress: bool,

    /// Minor collection at every allocation
    #[arg(long)]
    pub gc_stress_minor: bool,
}

impl Cli {
    pub fn to_heap_flags(&self) -> HeapFlags {
        HeapFlags {
            max_heap_size: self.max_heap_size,
            min_heap_size: self.min_heap_size,
            young_size: self.young_size,
            gc_verify: self.gc_verify,
            gc_verbose: self.gc_verbose,
            gc_stats: self.gc_stats,
            gc_stress: self.gc_stress,
            gc_stress_minor: self.gc_stress_minor,
        }
    }
}

fn parse_mem_size(value: &str) -> Result<MemSize, String> {
    let suffix = if let Some(ch) = value.chars().last() {
        match ch {
            'k' | 'K' => 1024,
            'm' | 'M' => 1024 * 1024,
            'g' | 'G' => 1024 * 1024 * 1024,
            _ => 1,
        }
    } else {
        1
    };

    let prefix = if suffix != 1 {
        let (left, _) = value.split_at(value.len() - 1);
        left
    } else {
        value
    };

    match prefix.parse::<usize>() {
        Ok(size) => Ok(MemSize(size * suffix)),
        Err(_) => Err(format!("'{}' is not a valid mem size", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mem_sizes() {
        assert_eq!(parse_mem_size("512"), Ok(MemSize(512)));
        assert_eq!(parse_mem_size("64k"), Ok(MemSize(64 * 1024)));
        assert_eq!(parse_mem_size("64K"), Ok(MemSize(64 * 1024)));
        assert_eq!(parse_mem_size("2M"), Ok(MemSize(2 * 1024 * 1024)));
        assert_eq!(parse_mem_size("1G"), Ok(MemSize(1024 * 1024 * 1024)));
        assert!(parse_mem_size("x").is_err());
    }
}
