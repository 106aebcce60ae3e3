//! Byte budget for rasters the cache keeps alive
//!
//! The cache holds strong references to recently rendered formulas so that
//! they survive after callers drop them. This budget bounds how many bytes
//! of raster those references may pin, and tells the retention ring when it
//! is under pressure and how far it should shrink.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory pressure level of the retention budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// Memory usage is low (< 50% utilization)
    Low,
    /// Memory usage is moderate (50-75% utilization)
    Moderate,
    /// Memory usage is high (75-90% utilization)
    High,
    /// Memory usage is critical (>= 90% utilization)
    Critical,
}

impl MemoryPressure {
    /// Get the memory pressure level from a utilization ratio (0.0 to 1.0)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }
}

/// Thresholds for the retention budget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudgetConfig {
    /// Bytes of raster the cache may keep alive
    pub total_budget: usize,
    /// Utilization (0.0 to 1.0) above which references are released
    pub pressure_threshold: f64,
    /// Utilization (0.0 to 1.0) to shrink to once releasing starts
    pub target_utilization: f64,
}

impl Default for MemoryBudgetConfig {
    fn default() -> Self {
        Self {
            total_budget: 64 * 1024 * 1024,
            pressure_threshold: 0.90,
            target_utilization: 0.75,
        }
    }
}

impl MemoryBudgetConfig {
    /// Create a configuration with a budget in megabytes and default thresholds
    pub fn new(total_budget_mb: usize) -> Self {
        Self::with_bytes(total_budget_mb.saturating_mul(1024 * 1024))
    }

    /// Create a configuration with a budget in bytes and default thresholds
    pub fn with_bytes(total_budget: usize) -> Self {
        Self {
            total_budget,
            ..Default::default()
        }
    }

    /// Set the pressure threshold (0.0 to 1.0)
    pub fn with_pressure_threshold(mut self, threshold: f64) -> Self {
        self.pressure_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the target utilization after releasing (0.0 to 1.0)
    pub fn with_target_utilization(mut self, target: f64) -> Self {
        self.target_utilization = target.clamp(0.0, 1.0);
        self
    }

    /// Get the pressure threshold in bytes
    pub fn pressure_bytes(&self) -> usize {
        (self.total_budget as f64 * self.pressure_threshold) as usize
    }

    /// Get the target in bytes
    pub fn target_bytes(&self) -> usize {
        (self.total_budget as f64 * self.target_utilization.min(self.pressure_threshold)) as usize
    }
}

/// Lock-free usage counter checked against a [`MemoryBudgetConfig`]
#[derive(Debug)]
pub struct MemoryBudget {
    config: MemoryBudgetConfig,
    current_usage: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(config: MemoryBudgetConfig) -> Self {
        Self {
            config,
            current_usage: AtomicUsize::new(0),
        }
    }

    /// Get the current usage in bytes
    pub fn current_usage(&self) -> usize {
        self.current_usage.load(Ordering::Relaxed)
    }

    /// Get the total budget in bytes
    pub fn total_budget(&self) -> usize {
        self.config.total_budget
    }

    /// Get the current utilization ratio (0.0 to 1.0, may exceed 1.0)
    pub fn utilization(&self) -> f64 {
        if self.config.total_budget == 0 {
            if self.current_usage() == 0 {
                0.0
            } else {
                1.0
            }
        } else {
            self.current_usage() as f64 / self.config.total_budget as f64
        }
    }

    /// Get the current memory pressure level
    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::from_utilization(self.utilization())
    }

    /// Record bytes that became pinned
    pub fn record_allocation(&self, bytes: usize) {
        self.current_usage.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes that were released
    pub fn record_deallocation(&self, bytes: usize) {
        self.current_usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            })
            .ok();
    }

    /// Forget all recorded usage
    pub fn reset(&self) {
        self.current_usage.store(0, Ordering::Relaxed);
    }

    /// True once usage has passed the pressure threshold
    pub fn under_pressure(&self) -> bool {
        self.current_usage() > self.config.pressure_bytes()
    }

    /// Bytes that must be released to get back down to the target
    pub fn bytes_to_release(&self) -> usize {
        self.current_usage()
            .saturating_sub(self.config.target_bytes())
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::new(MemoryBudgetConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    #[test]
    fn test_memory_pressure_levels() {
        assert_eq!(MemoryPressure::from_utilization(0.3), MemoryPressure::Low);
        assert_eq!(MemoryPressure::from_utilization(0.6), MemoryPressure::Moderate);
        assert_eq!(MemoryPressure::from_utilization(0.8), MemoryPressure::High);
        assert_eq!(MemoryPressure::from_utilization(0.95), MemoryPressure::Critical);
        assert_eq!(MemoryPressure::from_utilization(3.0), MemoryPressure::Critical);
    }

    #[test]
    fn test_config_builder_clamps() {
        let config = MemoryBudgetConfig::new(10)
            .with_pressure_threshold(1.5)
            .with_target_utilization(-0.2);

        assert_eq!(config.total_budget, 10 * MB);
        assert_eq!(config.pressure_threshold, 1.0);
        assert_eq!(config.target_utilization, 0.0);
    }

    #[test]
    fn test_huge_megabyte_budget_saturates() {
        let config = MemoryBudgetConfig::new(usize::MAX);
        assert_eq!(config.total_budget, usize::MAX);
    }

    #[test]
    fn test_target_never_above_threshold() {
        let config = MemoryBudgetConfig::new(100)
            .with_pressure_threshold(0.5)
            .with_target_utilization(0.8);

        assert_eq!(config.pressure_bytes(), 50 * MB);
        assert_eq!(config.target_bytes(), 50 * MB);
    }

    #[test]
    fn test_allocation_tracking() {
        let budget = MemoryBudget::new(MemoryBudgetConfig::new(100));

        budget.record_allocation(50 * MB);
        assert_eq!(budget.current_usage(), 50 * MB);
        assert_eq!(budget.utilization(), 0.5);
        assert_eq!(budget.pressure(), MemoryPressure::Moderate);

        budget.record_deallocation(20 * MB);
        assert_eq!(budget.current_usage(), 30 * MB);

        // Never underflows
        budget.record_deallocation(500 * MB);
        assert_eq!(budget.current_usage(), 0);
    }

    #[test]
    fn test_pressure_and_release_amount() {
        let budget = MemoryBudget::new(
            MemoryBudgetConfig::new(100)
                .with_pressure_threshold(0.9)
                .with_target_utilization(0.7),
        );

        budget.record_allocation(85 * MB);
        assert!(!budget.under_pressure());
        assert_eq!(budget.bytes_to_release(), 15 * MB);

        budget.record_allocation(10 * MB);
        assert!(budget.under_pressure());
        assert_eq!(budget.bytes_to_release(), 25 * MB);

        budget.record_deallocation(25 * MB);
        assert_eq!(budget.bytes_to_release(), 0);
    }

    #[test]
    fn test_zero_budget_is_always_under_pressure_when_used() {
        let budget = MemoryBudget::new(MemoryBudgetConfig::with_bytes(0));
        assert_eq!(budget.pressure(), MemoryPressure::Low);

        budget.record_allocation(1);
        assert!(budget.under_pressure());
        assert_eq!(budget.pressure(), MemoryPressure::Critical);
    }

    #[test]
    fn test_reset() {
        let budget = MemoryBudget::new(MemoryBudgetConfig::new(1));
        budget.record_allocation(MB);
        budget.reset();
        assert_eq!(budget.current_usage(), 0);
    }

    #[test]
    fn test_memory_budget_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let budget = Arc::new(MemoryBudget::new(MemoryBudgetConfig::new(100)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let budget_clone = Arc::clone(&budget);
                thread::spawn(move || {
                    for _ in 0..100 {
                        budget_clone.record_allocation(MB);
                        budget_clone.record_deallocation(MB);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(budget.current_usage(), 0);
    }
}
