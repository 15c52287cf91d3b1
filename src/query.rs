//! External luminosity database and run-registry queries.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use polars::prelude::*;
use serde::Deserialize;
use tracing::debug;

use crate::cache::{LumiKey, LumiValue};
use crate::config::{Config, Scenario};
use crate::error::{LumiError, Result};

const TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

pub trait LumiSource {
    fn lumi_by_section(&self, run: u32) -> Result<Vec<(LumiKey, LumiValue)>>;
}

pub trait RunRegistry {
    fn runs(&self) -> Result<Vec<RunInfo>>;
    /// Good-lumisection mask of one scenario, `None` when no mask query is
    /// configured.
    fn mask(&self, scenario: &Scenario) -> Result<Option<LumiMask>>;
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RunInfo {
    pub run: u32,
    pub end_time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawRunInfo {
    run: u32,
    end_time: String,
}

/// Parses a registry timestamp given in a zone `utc_offset_hours` ahead of UTC.
pub fn parse_end_time(raw: &str, utc_offset_hours: i32) -> Result<DateTime<Utc>> {
    let naive = TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
        .ok_or_else(|| LumiError::Timestamp(raw.to_string()))?;
    Ok(Utc.from_utc_datetime(&(naive - Duration::hours(i64::from(utc_offset_hours)))))
}

/// Parses the JSON run list printed by the registry command.
pub fn parse_runs(json: &str, utc_offset_hours: i32) -> Result<Vec<RunInfo>> {
    let raw: Vec<RawRunInfo> = serde_json::from_str(json)?;
    raw.into_iter()
        .map(|r| {
            Ok(RunInfo {
                run: r.run,
                end_time: parse_end_time(&r.end_time, utc_offset_hours)?,
            })
        })
        .collect()
}

/// Good lumisection ranges per run, in the `{"run": [[first, last], ...]}`
/// JSON layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LumiMask {
    ranges: HashMap<u32, Vec<(u32, u32)>>,
}

impl LumiMask {
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, Vec<[u32; 2]>> = serde_json::from_str(json)?;
        let mut ranges = HashMap::with_capacity(raw.len());
        for (run, spans) in raw {
            let run: u32 = run
                .trim()
                .parse()
                .map_err(|_| LumiError::InvalidKey(run.clone()))?;
            ranges.insert(run, spans.into_iter().map(|[a, b]| (a, b)).collect());
        }
        Ok(Self { ranges })
    }

    pub fn contains(&self, key: &LumiKey) -> bool {
        self.ranges.get(&key.run).is_some_and(|spans| {
            spans
                .iter()
                .any(|&(first, last)| (first..=last).contains(&key.section))
        })
    }
}

/// Runs `command` through `sh -c` and returns its stdout.
pub fn run_shell(command: &str) -> Result<Vec<u8>> {
    debug!(command, "running");
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .map_err(|e| LumiError::Command {
            command: command.to_string(),
            message: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(LumiError::Command {
            command: command.to_string(),
            message: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(output.stdout)
}

/// Reads a `Run,LS,Delivered,Recorded` CSV file.
pub fn read_lumi_csv(path: &Path) -> Result<Vec<(LumiKey, LumiValue)>> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    records_from_frame(&df)
}

/// Parses `Run,LS,Delivered,Recorded` CSV text.
pub fn parse_lumi_csv(bytes: Vec<u8>) -> Result<Vec<(LumiKey, LumiValue)>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()?;
    records_from_frame(&df)
}

fn records_from_frame(df: &DataFrame) -> Result<Vec<(LumiKey, LumiValue)>> {
    let runs = df.column("Run")?.cast(&DataType::UInt32)?;
    let sections = df.column("LS")?.cast(&DataType::UInt32)?;
    let delivered = df.column("Delivered")?.cast(&DataType::Float64)?;
    let recorded = df.column("Recorded")?.cast(&DataType::Float64)?;
    let records: Vec<_> = runs
        .u32()?
        .into_iter()
        .zip(sections.u32()?)
        .zip(delivered.f64()?)
        .zip(recorded.f64()?)
        .filter_map(|(((run, section), delivered), recorded)| {
            Some((
                LumiKey::new(run?, section?),
                LumiValue::new(delivered?, recorded?),
            ))
        })
        .collect();
    if records.len() < df.height() {
        debug!(
            dropped = df.height() - records.len(),
            "rows with missing values dropped"
        );
    }
    Ok(records)
}

/// Luminosity database tool invoked through the `Query` template.
pub struct ShellLumiSource<'a> {
    config: &'a Config,
}

impl<'a> ShellLumiSource<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }
}

impl LumiSource for ShellLumiSource<'_> {
    fn lumi_by_section(&self, run: u32) -> Result<Vec<(LumiKey, LumiValue)>> {
        let command = self
            .config
            .substitute(&self.config.query_command, &[("run", run.to_string())]);
        let records = parse_lumi_csv(run_shell(&command)?)?;
        Ok(records.into_iter().filter(|(k, _)| k.run == run).collect())
    }
}

/// Run registry reached through the `Runs` and `Mask` templates.
pub struct ShellRegistry<'a> {
    config: &'a Config,
}

impl<'a> ShellRegistry<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }
}

impl RunRegistry for ShellRegistry<'_> {
    fn runs(&self) -> Result<Vec<RunInfo>> {
        let command = self.config.substitute(&self.config.runs_command, &[]);
        let stdout = run_shell(&command)?;
        parse_runs(
            &String::from_utf8_lossy(&stdout),
            self.config.utc_offset_hours,
        )
    }

    fn mask(&self, scenario: &Scenario) -> Result<Option<LumiMask>> {
        let Some(template) = &self.config.mask_command else {
            return Ok(None);
        };
        let command = self
            .config
            .substitute(template, &[("scenario", scenario.selector.clone())]);
        let stdout = run_shell(&command)?;
        LumiMask::from_json(&String::from_utf8_lossy(&stdout)).map(Some)
    }
}
