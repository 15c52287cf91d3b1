use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};

use crate::cache::LumiCache;
use crate::query::LumiMask;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RunTotals {
    pub delivered: f64,
    pub recorded: f64,
}

impl RunTotals {
    fn add(&mut self, delivered: f64, recorded: f64) {
        self.delivered += delivered;
        self.recorded += recorded;
    }
}

/// Accepted luminosity of one scenario, overall and inside the window.
#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioTotals {
    pub name: String,
    pub accepted: f64,
    pub window_accepted: f64,
    pub per_run: BTreeMap<u32, f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub per_run: BTreeMap<u32, RunTotals>,
    pub totals: RunTotals,
    pub window_totals: RunTotals,
    pub window_days: u32,
    pub last_run_time: Option<DateTime<Utc>>,
    pub scenarios: Vec<ScenarioTotals>,
}

/// Sums one batch run's luminosity per run, overall, over the trailing
/// window and per acceptance scenario.
pub struct Aggregator<'a> {
    cache: &'a LumiCache,
    run_times: &'a HashMap<u32, DateTime<Utc>>,
    window_days: u32,
    last_run_time: Option<DateTime<Utc>>,
    per_run: BTreeMap<u32, RunTotals>,
    scenarios: Vec<ScenarioTotals>,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        cache: &'a LumiCache,
        run_times: &'a HashMap<u32, DateTime<Utc>>,
        window_days: u32,
    ) -> Self {
        let mut per_run: BTreeMap<u32, RunTotals> = BTreeMap::new();
        for (key, value) in cache.iter() {
            per_run
                .entry(key.run)
                .or_default()
                .add(value.delivered, value.recorded);
        }
        let last_run_time = per_run
            .keys()
            .filter_map(|run| run_times.get(run))
            .max()
            .copied();
        Self {
            cache,
            run_times,
            window_days,
            last_run_time,
            per_run,
            scenarios: Vec::new(),
        }
    }

    pub fn run_totals(&self) -> &BTreeMap<u32, RunTotals> {
        &self.per_run
    }

    pub fn totals(&self) -> RunTotals {
        self.per_run
            .values()
            .fold(RunTotals::default(), |mut acc, t| {
                acc.add(t.delivered, t.recorded);
                acc
            })
    }

    /// Totals of runs ending inside the window. Runs without a known end-time
    /// are never counted.
    pub fn window_totals(&self) -> RunTotals {
        self.per_run
            .iter()
            .filter(|(run, _)| self.run_in_window(**run))
            .fold(RunTotals::default(), |mut acc, (_, t)| {
                acc.add(t.delivered, t.recorded);
                acc
            })
    }

    fn run_in_window(&self, run: u32) -> bool {
        match (self.run_times.get(&run), self.last_run_time) {
            (Some(time), Some(last)) => in_window(*time, last, self.window_days),
            _ => false,
        }
    }

    /// Adds a scenario whose accepted luminosity is the recorded luminosity of
    /// the sections inside `mask`.
    pub fn accept(&mut self, name: &str, mask: &LumiMask) {
        let mut per_run: BTreeMap<u32, f64> = BTreeMap::new();
        for (key, value) in self.cache.iter().filter(|(k, _)| mask.contains(k)) {
            *per_run.entry(key.run).or_default() += value.recorded;
        }
        let accepted = per_run.values().sum();
        let window_accepted = per_run
            .iter()
            .filter(|(run, _)| self.run_in_window(**run))
            .map(|(_, v)| v)
            .sum();
        self.scenarios.push(ScenarioTotals {
            name: name.to_string(),
            accepted,
            window_accepted,
            per_run,
        });
    }

    pub fn summary(&self) -> Summary {
        Summary {
            per_run: self.per_run.clone(),
            totals: self.totals(),
            window_totals: self.window_totals(),
            window_days: self.window_days,
            last_run_time: self.last_run_time,
            scenarios: self.scenarios.clone(),
        }
    }
}

/// True when `run_time` is no more than `days` days before `last_time`.
pub fn in_window(run_time: DateTime<Utc>, last_time: DateTime<Utc>, days: u32) -> bool {
    run_time >= last_time - Duration::seconds(86400 * i64::from(days))
}

pub fn efficiency(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LumiKey, LumiValue};
    use chrono::TimeZone;

    fn cache(records: &[(u32, u32, f64, f64)]) -> LumiCache {
        let mut cache = LumiCache::new();
        for &(run, section, delivered, recorded) in records {
            cache
                .insert(LumiKey::new(run, section), LumiValue::new(delivered, recorded))
                .unwrap();
        }
        cache
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2010, 10, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn sums_sections_of_a_run() {
        let cache = cache(&[(100, 1, 5.0, 4.0), (100, 2, 3.0, 2.0)]);
        let times = HashMap::new();
        let agg = Aggregator::new(&cache, &times, 7);
        let run = agg.run_totals()[&100];
        assert_eq!(run.recorded, 6.0);
        assert_eq!(run.delivered, 8.0);
    }

    #[test]
    fn aggregation_of_an_unchanged_cache_file_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lumi_cache.txt");
        std::fs::write(&path, "100_1 5.0 4.0\n100_2 3.0 2.0\n101_1 1.5 1.25\n").unwrap();
        let times = HashMap::from([(100, at(1, 0)), (101, at(2, 0))]);

        let (first, _) = LumiCache::load(&path, false).unwrap();
        let (second, _) = LumiCache::load(&path, false).unwrap();
        let a = Aggregator::new(&first, &times, 7).summary();
        let b = Aggregator::new(&second, &times, 7).summary();
        assert_eq!(a, b);
        assert_eq!(a.totals, RunTotals { delivered: 9.5, recorded: 7.25 });
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let last = at(15, 12);
        assert!(in_window(at(8, 12), last, 7));
        assert!(!in_window(at(7, 12), last, 7));
        assert!(!in_window(at(8, 11), last, 7));
        assert!(in_window(last, last, 7));
    }

    #[test]
    fn window_totals_use_latest_run_time() {
        let cache = cache(&[
            (100, 1, 10.0, 9.0),
            (101, 1, 4.0, 3.0),
            (102, 1, 2.0, 1.0),
            (103, 1, 1.0, 1.0),
        ]);
        let times = HashMap::from([
            (100, at(7, 12)),
            (101, at(8, 12)),
            (102, at(15, 12)),
        ]);
        let agg = Aggregator::new(&cache, &times, 7);
        let window = agg.window_totals();
        assert_eq!(window, RunTotals { delivered: 6.0, recorded: 4.0 });
        assert_eq!(agg.totals(), RunTotals { delivered: 17.0, recorded: 14.0 });
    }

    #[test]
    fn scenario_accepts_masked_sections() {
        let cache = cache(&[
            (100, 1, 5.0, 4.0),
            (100, 2, 3.0, 2.0),
            (100, 3, 3.0, 2.5),
            (101, 1, 1.0, 1.0),
        ]);
        let times = HashMap::from([(100, at(1, 0)), (101, at(10, 0))]);
        let mask = LumiMask::from_json(r#"{"100": [[2, 3]], "101": [[1, 1]]}"#).unwrap();
        let mut agg = Aggregator::new(&cache, &times, 7);
        agg.accept("Tracker", &mask);
        let summary = agg.summary();
        let tracker = &summary.scenarios[0];
        assert_eq!(tracker.name, "Tracker");
        assert_eq!(tracker.accepted, 5.5);
        assert_eq!(tracker.window_accepted, 1.0);
        assert_eq!(tracker.per_run[&100], 4.5);
    }

    #[test]
    fn efficiency_of_nothing_is_zero() {
        assert_eq!(efficiency(1.0, 0.0), 0.0);
        assert_eq!(efficiency(3.0, 4.0), 0.75);
    }
}
