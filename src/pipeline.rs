//! One batch run: config, cache refresh, aggregation, plots and report.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use tracing::{info, warn};

use crate::aggregate::{Aggregator, Summary};
use crate::cache::LumiCache;
use crate::config::Config;
use crate::error::{LumiError, Result};
use crate::plot;
use crate::query::{read_lumi_csv, LumiSource, RunRegistry, ShellLumiSource, ShellRegistry};
use crate::report::{self, Report, REPORT_FILE, TABLE_FILE};

#[derive(Clone, Debug, Default)]
pub struct Options {
    pub cfg: PathBuf,
    pub lumi_csv: Option<PathBuf>,
    pub reset_lumi: bool,
    pub global: bool,
    pub keep_range: bool,
}

pub struct LumiWeb {
    config: Config,
    options: Options,
}

impl LumiWeb {
    pub fn new(options: Options) -> Result<Self> {
        let config = Config::load(&options.cfg, options.global)?;
        Ok(Self { config, options })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(&self) -> Result<Summary> {
        let registry = ShellRegistry::new(&self.config);
        let source = ShellLumiSource::new(&self.config);
        self.run_with(&registry, &source)
    }

    pub fn run_with(&self, registry: &dyn RunRegistry, source: &dyn LumiSource) -> Result<Summary> {
        let config = &self.config;
        let (mut cache, reset) = LumiCache::load(&config.cache, self.options.reset_lumi)?;

        let runs: Vec<_> = match registry.runs() {
            Ok(runs) => runs
                .into_iter()
                .filter(|r| config.run_range().contains(&r.run))
                .collect(),
            Err(e) => {
                warn!(error = %e, "run registry unavailable, reporting cached luminosity only");
                Vec::new()
            }
        };
        info!(runs = runs.len(), reset, "run registry queried");
        let run_times: HashMap<u32, DateTime<Utc>> =
            runs.iter().map(|r| (r.run, r.end_time)).collect();

        match &self.options.lumi_csv {
            Some(csv) => {
                let records = read_lumi_csv(csv)?;
                info!(path = %csv.display(), records = records.len(), "merging luminosity CSV");
                for (key, value) in records {
                    if let Err(e) = cache.insert(key, value) {
                        warn!(error = %e, "skipping CSV record");
                    }
                }
            }
            None => self.refresh(&mut cache, reset, &run_times, source),
        }

        cache.save(&config.cache)?;

        let in_range;
        let reported = if self.options.keep_range {
            let mut c = cache.clone();
            c.retain_runs(&config.run_range());
            in_range = c;
            &in_range
        } else {
            &cache
        };

        if config.mask_command.is_none() && !config.scenarios.is_empty() {
            warn!(
                scenarios = config.scenarios.len(),
                "no Mask command configured, acceptance scenarios skipped"
            );
        }
        let mut aggregator = Aggregator::new(reported, &run_times, config.window_days);
        for scenario in &config.scenarios {
            match registry.mask(scenario) {
                Ok(Some(mask)) => aggregator.accept(&scenario.name, &mask),
                Ok(None) => {}
                Err(e) => warn!(scenario = %scenario.name, error = %e, "scenario dropped"),
            }
        }
        let summary = aggregator.summary();
        info!(
            runs = summary.per_run.len(),
            delivered = summary.totals.delivered,
            recorded = summary.totals.recorded,
            "luminosity aggregated"
        );

        self.publish(&summary)?;
        Ok(summary)
    }

    fn refresh(
        &self,
        cache: &mut LumiCache,
        reset: bool,
        run_times: &HashMap<u32, DateTime<Utc>>,
        source: &dyn LumiSource,
    ) {
        let mut todo: Vec<u32> = if reset {
            run_times.keys().copied().collect()
        } else {
            cache
                .stale_runs(run_times, self.config.stale_days)
                .into_iter()
                .collect()
        };
        todo.sort_unstable();
        info!(runs = todo.len(), "querying luminosity database");

        let bar = ProgressBar::new(todo.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} runs {msg}") {
            bar.set_style(style);
        }
        let mut failed = 0usize;
        for run in todo.into_iter().progress_with(bar) {
            match source.lumi_by_section(run) {
                Ok(records) if records.is_empty() => {
                    warn!(run, "no luminosity returned");
                }
                Ok(records) => cache.replace_run(run, records),
                Err(e) => {
                    failed += 1;
                    warn!(run, error = %e, "luminosity query failed");
                }
            }
        }
        if failed > 0 {
            warn!(failed, "some runs kept their cached luminosity");
        }
    }

    fn publish(&self, summary: &Summary) -> Result<()> {
        let config = &self.config;
        fs::create_dir_all(&config.out_dir).map_err(|e| LumiError::io(&config.out_dir, e))?;

        let mut table = report::run_table(summary, config.scale)?;
        println!("{}", table);
        report::write_tsv(&mut table, &config.out_dir.join(TABLE_FILE))?;

        let plots = if config.plots {
            plot::render_all(summary, &config.out_dir, config.scale, &config.unit)
        } else {
            Vec::new()
        };
        Report::from_summary(summary, config, &plots, Utc::now())
            .write(config.template.as_deref(), &config.out_dir.join(REPORT_FILE))
    }
}
