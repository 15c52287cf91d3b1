use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::ops::RangeInclusive;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::{LumiError, Result};

/// A lumisection of a run, written `run_section` in the cache file.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LumiKey {
    pub run: u32,
    pub section: u32,
}

impl LumiKey {
    pub fn new(run: u32, section: u32) -> Self {
        Self { run, section }
    }
}

impl fmt::Display for LumiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.run, self.section)
    }
}

impl FromStr for LumiKey {
    type Err = LumiError;

    fn from_str(s: &str) -> Result<Self> {
        let (run, section) = s
            .split_once('_')
            .ok_or_else(|| LumiError::InvalidKey(s.to_string()))?;
        Ok(LumiKey {
            run: run.parse().map_err(|_| LumiError::InvalidKey(s.to_string()))?,
            section: section
                .parse()
                .map_err(|_| LumiError::InvalidKey(s.to_string()))?,
        })
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct LumiValue {
    pub delivered: f64,
    pub recorded: f64,
}

impl LumiValue {
    pub fn new(delivered: f64, recorded: f64) -> Self {
        Self {
            delivered,
            recorded,
        }
    }
}

/// Per-lumisection delivered/recorded luminosity, persisted as a flat text
/// file of `key delivered recorded` lines.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LumiCache {
    records: BTreeMap<LumiKey, LumiValue>,
}

impl LumiCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the cache at `path`. The returned flag is true when the cache has
    /// to be rebuilt from scratch: either `reset` was requested or there is no
    /// cache file yet.
    pub fn load(path: &Path, reset: bool) -> Result<(Self, bool)> {
        if reset {
            debug!(path = %path.display(), "cache reset requested");
            return Ok((Self::new(), true));
        }
        if !path.exists() {
            warn!(path = %path.display(), "no luminosity cache found, rebuilding");
            return Ok((Self::new(), true));
        }
        let text = fs::read_to_string(path).map_err(|e| LumiError::io(path, e))?;
        let cache = Self::parse(&text);
        debug!(path = %path.display(), records = cache.len(), "cache loaded");
        Ok((cache, false))
    }

    /// Parses cache text, skipping lines that cannot be used.
    pub fn parse(text: &str) -> Self {
        let mut cache = Self::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Err(e) = parse_line(line).and_then(|(k, v)| cache.insert(k, v)) {
                warn!(line = lineno + 1, error = %e, "skipping cache line");
            }
        }
        cache
    }

    /// Writes the whole cache, replacing any previous file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| LumiError::io(dir, e))?;
        }
        let tmp = path.with_extension("tmp");
        let file = fs::File::create(&tmp).map_err(|e| LumiError::io(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        for (key, value) in &self.records {
            writeln!(writer, "{} {} {}", key, value.delivered, value.recorded)
                .map_err(|e| LumiError::io(&tmp, e))?;
        }
        writer.flush().map_err(|e| LumiError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| LumiError::io(path, e))?;
        debug!(path = %path.display(), records = self.len(), "cache written");
        Ok(())
    }

    pub fn insert(&mut self, key: LumiKey, value: LumiValue) -> Result<()> {
        if !(value.delivered >= 0.0 && value.recorded >= 0.0) {
            return Err(LumiError::NegativeLumi {
                key: key.to_string(),
                delivered: value.delivered,
                recorded: value.recorded,
            });
        }
        self.records.insert(key, value);
        Ok(())
    }

    /// Drops every section of `run` and inserts `records` in its place.
    /// Records with negative values are skipped.
    pub fn replace_run(&mut self, run: u32, records: Vec<(LumiKey, LumiValue)>) {
        self.records.retain(|k, _| k.run != run);
        for (key, value) in records {
            if let Err(e) = self.insert(key, value) {
                warn!(run, error = %e, "dropping record");
            }
        }
    }

    pub fn get(&self, key: &LumiKey) -> Option<&LumiValue> {
        self.records.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LumiKey, &LumiValue)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn runs(&self) -> BTreeSet<u32> {
        self.records.keys().map(|k| k.run).collect()
    }

    pub fn retain_runs(&mut self, range: &RangeInclusive<u32>) {
        self.records.retain(|k, _| range.contains(&k.run));
    }

    /// Runs that need a fresh query: every run in `run_times` missing from the
    /// cache, and every run that ended no more than `stale_days` before the
    /// newest cached run.
    pub fn stale_runs(
        &self,
        run_times: &HashMap<u32, DateTime<Utc>>,
        stale_days: u32,
    ) -> BTreeSet<u32> {
        let cached = self.runs();
        let newest = cached.iter().filter_map(|run| run_times.get(run)).max();
        let mut stale: BTreeSet<u32> = run_times
            .keys()
            .filter(|run| !cached.contains(*run))
            .copied()
            .collect();
        if let Some(newest) = newest {
            let cutoff = *newest - Duration::days(i64::from(stale_days));
            stale.extend(
                cached
                    .iter()
                    .filter(|run| run_times.get(*run).is_some_and(|t| *t >= cutoff)),
            );
        }
        stale
    }
}

fn parse_line(line: &str) -> Result<(LumiKey, LumiValue)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let &[key, delivered, recorded] = fields.as_slice() else {
        return Err(LumiError::InvalidKey(line.to_string()));
    };
    let number = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| LumiError::InvalidKey(line.to_string()))
    };
    Ok((key.parse()?, LumiValue::new(number(delivered)?, number(recorded)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn time(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2010, 10, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn key_round_trips_through_text() {
        let key: LumiKey = "146644_12".parse().unwrap();
        assert_eq!(key, LumiKey::new(146644, 12));
        assert_eq!(key.to_string(), "146644_12");
        assert!("146644".parse::<LumiKey>().is_err());
        assert!("run_12".parse::<LumiKey>().is_err());
    }

    #[test]
    fn missing_file_sets_reset_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.txt");
        let (cache, reset) = LumiCache::load(&path, false).unwrap();
        assert!(reset);
        assert!(cache.is_empty());
    }

    #[test]
    fn reset_ignores_existing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "100_1 5.0 4.0").unwrap();
        let (cache, reset) = LumiCache::load(file.path(), true).unwrap();
        assert!(reset);
        assert!(cache.is_empty());
    }

    #[test]
    fn parse_skips_bad_lines() {
        let cache = LumiCache::parse("100_1 5 4\n\ngarbage\n100_2 -1 2\n100_3 1 x\n101_1 2 1\n");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&LumiKey::new(100, 1)), Some(&LumiValue::new(5.0, 4.0)));
        assert_eq!(cache.get(&LumiKey::new(101, 1)), Some(&LumiValue::new(2.0, 1.0)));
    }

    #[test]
    fn save_rewrites_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("lumi_cache.txt");
        let mut cache = LumiCache::new();
        cache.insert(LumiKey::new(100, 2), LumiValue::new(3.0, 2.0)).unwrap();
        cache.insert(LumiKey::new(100, 1), LumiValue::new(5.0, 4.0)).unwrap();
        cache.save(&path).unwrap();
        cache.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "100_1 5 4\n100_2 3 2\n");
        let (reloaded, reset) = LumiCache::load(&path, false).unwrap();
        assert!(!reset);
        assert_eq!(reloaded, cache);
    }

    #[test]
    fn insert_rejects_negative_and_overwrites_duplicates() {
        let mut cache = LumiCache::new();
        let key = LumiKey::new(7, 1);
        assert!(cache.insert(key, LumiValue::new(-1.0, 0.0)).is_err());
        assert!(cache.insert(key, LumiValue::new(f64::NAN, 0.0)).is_err());
        cache.insert(key, LumiValue::new(1.0, 1.0)).unwrap();
        cache.insert(key, LumiValue::new(2.0, 1.5)).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key), Some(&LumiValue::new(2.0, 1.5)));
    }

    #[test]
    fn replace_run_drops_old_sections() {
        let mut cache = LumiCache::parse("100_1 1 1\n100_2 1 1\n100_3 1 1\n101_1 1 1\n");
        cache.replace_run(100, vec![(LumiKey::new(100, 1), LumiValue::new(9.0, 8.0))]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&LumiKey::new(100, 1)), Some(&LumiValue::new(9.0, 8.0)));
        assert!(cache.get(&LumiKey::new(100, 2)).is_none());
    }

    #[test]
    fn stale_runs_cover_missing_and_recent() {
        let cache = LumiCache::parse("100_1 1 1\n101_1 1 1\n102_1 1 1\n");
        let run_times = HashMap::from([
            (100, time(1)),
            (101, time(5)),
            (102, time(12)),
            (103, time(13)),
        ]);
        let stale = cache.stale_runs(&run_times, 7);
        assert_eq!(stale, BTreeSet::from([101, 102, 103]));
    }

    #[test]
    fn stale_runs_on_empty_cache_are_all_registry_runs() {
        let run_times = HashMap::from([(100, time(1)), (101, time(2))]);
        let stale = LumiCache::new().stale_runs(&run_times, 7);
        assert_eq!(stale, BTreeSet::from([100, 101]));
    }

    #[test]
    fn retain_runs_keeps_range() {
        let mut cache = LumiCache::parse("99_1 1 1\n100_1 1 1\n150_1 1 1\n151_1 1 1\n");
        cache.retain_runs(&(100..=150));
        assert_eq!(cache.runs(), BTreeSet::from([100, 150]));
    }
}
