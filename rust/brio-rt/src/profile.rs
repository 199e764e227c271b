//! Call profiling for a future JIT tier.
//!
//! Every closure call bumps a per-function counter and accumulates
//! elapsed wall time. A later tier can use `hot_functions` to pick
//! compilation candidates; nothing here affects program semantics.

use brio_core::values::CompiledFunction;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct FnProfile {
    pub name: String,
    pub calls: u64,
    pub total: Duration,
}

#[derive(Debug, Default)]
pub struct Profiler {
    /// Keyed by the function's allocation identity.
    stats: HashMap<usize, FnProfile>,
    pub total_calls: u64,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(func: &Rc<CompiledFunction>) -> usize {
        Rc::as_ptr(func) as usize
    }

    pub fn record_call(&mut self, func: &Rc<CompiledFunction>) {
        self.total_calls += 1;
        let entry = self.stats.entry(Self::key(func)).or_insert_with(|| FnProfile {
            name: func
                .name
                .clone()
                .unwrap_or_else(|| format!("<fn/{}>", func.num_params)),
            ..FnProfile::default()
        });
        entry.calls += 1;
    }

    pub fn record_elapsed(&mut self, func: &Rc<CompiledFunction>, elapsed: Duration) {
        if let Some(entry) = self.stats.get_mut(&Self::key(func)) {
            entry.total += elapsed;
        }
    }

    /// Functions whose call count crossed `threshold`, hottest first.
    pub fn hot_functions(&self, threshold: u64) -> Vec<&FnProfile> {
        let mut hot: Vec<&FnProfile> = self
            .stats
            .values()
            .filter(|p| p.calls >= threshold)
            .collect();
        hot.sort_by(|a, b| b.calls.cmp(&a.calls));
        hot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(name: &str) -> Rc<CompiledFunction> {
        Rc::new(CompiledFunction {
            instructions: Vec::new(),
            num_params: 0,
            num_locals: 0,
            name: Some(name.to_string()),
        })
    }

    #[test]
    fn counts_calls_per_function() {
        let mut profiler = Profiler::new();
        let f = func("f");
        let g = func("g");
        for _ in 0..5 {
            profiler.record_call(&f);
        }
        profiler.record_call(&g);
        assert_eq!(profiler.total_calls, 6);
        let hot = profiler.hot_functions(5);
        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].name, "f");
        assert_eq!(hot[0].calls, 5);
    }

    #[test]
    fn elapsed_time_accumulates() {
        let mut profiler = Profiler::new();
        let f = func("f");
        profiler.record_call(&f);
        profiler.record_elapsed(&f, Duration::from_millis(3));
        profiler.record_elapsed(&f, Duration::from_millis(4));
        let hot = profiler.hot_functions(1);
        assert_eq!(hot[0].total, Duration::from_millis(7));
    }
}
