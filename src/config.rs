//! Run-registry configuration.
//!
//! The configuration is an INI file with a `[Common]` section describing the
//! run range and dataset, an optional `[Global]` override, a `[Lumi]` section
//! with the external commands and output settings, and an optional
//! `[Scenarios]` list of acceptance scenarios.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::{Ini, ParseOption, Properties};

use crate::error::{LumiError, Result};

const COMMON: &str = "Common";
const GLOBAL: &str = "Global";
const LUMI: &str = "Lumi";
const SCENARIOS: &str = "Scenarios";

/// An acceptance scenario: a name shown in the report and the selector passed
/// to the mask command.
#[derive(Clone, Debug, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub selector: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub run_registry: String,
    pub run_min: u32,
    pub run_max: u32,
    pub dataset: String,
    pub group: String,
    pub global: bool,
    pub cache: PathBuf,
    pub query_command: String,
    pub runs_command: String,
    pub mask_command: Option<String>,
    pub out_dir: PathBuf,
    pub template: Option<PathBuf>,
    pub window_days: u32,
    pub stale_days: u32,
    pub utc_offset_hours: i32,
    pub scale: f64,
    pub unit: String,
    pub plots: bool,
    pub scenarios: Vec<Scenario>,
}

impl Config {
    /// Loads the configuration file. Relative `Cache`, `OutDir` and `Template`
    /// paths are resolved against the directory holding the file.
    pub fn load(path: &Path, global: bool) -> Result<Self> {
        let ini = Ini::load_from_file_opt(path, parse_options()).map_err(|source| {
            LumiError::ConfigRead {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Config::from_ini(&ini, base, global)
    }

    pub fn parse(text: &str, base: &Path, global: bool) -> Result<Self> {
        let ini = Ini::load_from_str_opt(text, parse_options())
            .map_err(|e| LumiError::config("", "", e.to_string()))?;
        Config::from_ini(&ini, base, global)
    }

    fn from_ini(ini: &Ini, base: &Path, global: bool) -> Result<Self> {
        let common = section(ini, COMMON)?;
        let lumi = section(ini, LUMI)?;

        let run_min: u32 = required_value(common, COMMON, "Runmin")?;
        let run_max: u32 = optional_value(common, COMMON, "Runmax")?.unwrap_or(u32::MAX);
        if run_min > run_max {
            return Err(LumiError::config(
                COMMON,
                "Runmin",
                format!("{run_min} is greater than Runmax {run_max}"),
            ));
        }

        let mut dataset = common.get("Dataset").unwrap_or(".*").to_string();
        let mut group = common.get("Group").unwrap_or("Collisions").to_string();
        if global {
            let overrides = ini.section(Some(GLOBAL)).ok_or_else(|| {
                LumiError::config(GLOBAL, "", "--global requested but section is missing")
            })?;
            if let Some(d) = overrides.get("Dataset") {
                dataset = d.to_string();
            }
            if let Some(g) = overrides.get("Group") {
                group = g.to_string();
            }
        }

        let scenarios = ini
            .section(Some(SCENARIOS))
            .map(|props| {
                props
                    .iter()
                    .map(|(name, selector)| Scenario {
                        name: name.trim().to_string(),
                        selector: selector.trim().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            run_registry: required_string(common, COMMON, "RunReg")?,
            run_min,
            run_max,
            dataset,
            group,
            global,
            cache: base.join(lumi.get("Cache").unwrap_or("lumi_cache.txt")),
            query_command: required_string(lumi, LUMI, "Query")?,
            runs_command: required_string(lumi, LUMI, "Runs")?,
            mask_command: lumi.get("Mask").map(str::to_string),
            out_dir: base.join(lumi.get("OutDir").unwrap_or(".")),
            template: lumi.get("Template").map(|t| base.join(t)),
            window_days: optional_value(lumi, LUMI, "WindowDays")?.unwrap_or(7),
            stale_days: optional_value(lumi, LUMI, "StaleDays")?.unwrap_or(7),
            utc_offset_hours: optional_value(lumi, LUMI, "UtcOffset")?.unwrap_or(0),
            scale: optional_value(lumi, LUMI, "Scale")?.unwrap_or(1e-6),
            unit: lumi.get("Unit").unwrap_or("/pb").to_string(),
            plots: optional_bool(lumi, LUMI, "Plots")?.unwrap_or(true),
            scenarios,
        })
    }

    pub fn run_range(&self) -> RangeInclusive<u32> {
        self.run_min..=self.run_max
    }

    /// Expands `{url}`, `{runmin}`, `{runmax}`, `{dataset}` and `{group}` in a
    /// command template, followed by any caller supplied placeholders.
    pub fn substitute(&self, template: &str, extra: &[(&str, String)]) -> String {
        let mut out = template
            .replace("{url}", &self.run_registry)
            .replace("{runmin}", &self.run_min.to_string())
            .replace("{runmax}", &self.run_max.to_string())
            .replace("{dataset}", &self.dataset)
            .replace("{group}", &self.group);
        for (name, value) in extra {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }
}

// Command templates carry shell quoting and backslashes verbatim.
fn parse_options() -> ParseOption {
    ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    }
}

fn section<'a>(ini: &'a Ini, name: &str) -> Result<&'a Properties> {
    ini.section(Some(name))
        .ok_or_else(|| LumiError::config(name, "", "section is missing"))
}

fn required_string(props: &Properties, section: &str, key: &str) -> Result<String> {
    match props.get(key).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(LumiError::config(section, key, "required key is missing")),
    }
}

fn required_value<T: FromStr>(props: &Properties, section: &str, key: &str) -> Result<T> {
    optional_value(props, section, key)?
        .ok_or_else(|| LumiError::config(section, key, "required key is missing"))
}

fn optional_value<T: FromStr>(props: &Properties, section: &str, key: &str) -> Result<Option<T>> {
    props
        .get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| LumiError::config(section, key, format!("cannot parse `{raw}`")))
        })
        .transpose()
}

fn optional_bool(props: &Properties, section: &str, key: &str) -> Result<Option<bool>> {
    props
        .get(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(LumiError::config(section, key, format!("`{raw}` is not a boolean"))),
        })
        .transpose()
}
