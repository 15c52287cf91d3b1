//! HTML report and per-run summary table.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use polars::prelude::*;
use tracing::{info, warn};

use crate::aggregate::{efficiency, Summary};
use crate::config::Config;
use crate::error::{LumiError, Result};

pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/report.html");
pub const REPORT_FILE: &str = "index.html";
pub const TABLE_FILE: &str = "runs.tsv";

/// Replaces `{{name}}` placeholders with `vars[name]`. Placeholders without a
/// value are kept verbatim and their names returned.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> (String, Vec<String>) {
    let mut out = String::with_capacity(template.len());
    let mut unknown = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = after[..end].trim();
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => {
                out.push_str(&rest[start..start + 2 + end + 2]);
                if !unknown.iter().any(|u| u == name) {
                    unknown.push(name.to_string());
                }
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    (out, unknown)
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn percent(numerator: f64, denominator: f64) -> String {
    format!("{:.1}%", 100.0 * efficiency(numerator, denominator))
}

pub struct Report {
    vars: BTreeMap<String, String>,
}

impl Report {
    pub fn from_summary(
        summary: &Summary,
        config: &Config,
        plots: &[String],
        generated: DateTime<Utc>,
    ) -> Self {
        let scale = config.scale;
        let lumi = |value: f64| format!("{:.3}", value * scale);
        let mut vars = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            vars.insert(k.to_string(), v);
        };

        let scope = if config.global { "global" } else { "online" };
        set("title", escape(&format!("Luminosity report ({scope})")));
        set("generated", generated.format("%Y-%m-%d %H:%M:%S").to_string());
        set("dataset", escape(&config.dataset));
        set("group", escape(&config.group));
        let first = summary.per_run.keys().next();
        let last = summary.per_run.keys().next_back();
        set("runmin", first.map_or_else(|| config.run_min.to_string(), u32::to_string));
        set("runmax", last.map_or_else(|| "-".to_string(), u32::to_string));
        set("nruns", summary.per_run.len().to_string());
        set(
            "last_run",
            summary.last_run_time.map_or_else(
                || "unknown".to_string(),
                |t| t.format("%Y-%m-%d %H:%M").to_string(),
            ),
        );
        set("unit", escape(&config.unit));
        set("window_days", summary.window_days.to_string());

        let totals = summary.totals;
        let window = summary.window_totals;
        set("delivered", lumi(totals.delivered));
        set("recorded", lumi(totals.recorded));
        set("live", percent(totals.recorded, totals.delivered));
        set("window_delivered", lumi(window.delivered));
        set("window_recorded", lumi(window.recorded));
        set("window_live", percent(window.recorded, window.delivered));

        let rows: Vec<String> = summary
            .scenarios
            .iter()
            .map(|s| {
                format!(
                    "<tr><td class=\"name\">{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                    escape(&s.name),
                    lumi(s.accepted),
                    percent(s.accepted, totals.recorded),
                    lumi(s.window_accepted),
                    percent(s.window_accepted, window.recorded),
                )
            })
            .collect();
        set("scenario_rows", rows.join("\n"));

        let images: Vec<String> = plots
            .iter()
            .map(|p| format!("<p><img src=\"{0}\" alt=\"{0}\"></p>", escape(p)))
            .collect();
        set("plots", images.join("\n"));

        Self { vars }
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Renders `template` (the built-in one when `None`) into `path`.
    pub fn write(&self, template: Option<&Path>, path: &Path) -> Result<()> {
        let text = match template {
            Some(t) => fs::read_to_string(t).map_err(|e| LumiError::io(t, e))?,
            None => DEFAULT_TEMPLATE.to_string(),
        };
        let (html, unknown) = render(&text, &self.vars);
        if !unknown.is_empty() {
            warn!(placeholders = ?unknown, "template placeholders without a value");
        }
        fs::write(path, html).map_err(|e| LumiError::io(path, e))?;
        info!(path = %path.display(), "report written");
        Ok(())
    }
}

/// Per-run table in the reported unit, one accepted column per scenario.
pub fn run_table(summary: &Summary, scale: f64) -> Result<DataFrame> {
    let runs: Vec<u32> = summary.per_run.keys().copied().collect();
    let delivered: Vec<f64> = summary.per_run.values().map(|t| t.delivered).collect();
    let recorded: Vec<f64> = summary.per_run.values().map(|t| t.recorded).collect();
    let mut columns = vec![
        Series::new("Run", runs),
        Series::new("Delivered", delivered),
        Series::new("Recorded", recorded),
    ];
    let mut scaled = vec![
        (col("Delivered") * lit(scale)).alias("Delivered"),
        (col("Recorded") * lit(scale)).alias("Recorded"),
        when(col("Delivered").gt(lit(0.0)))
            .then(col("Recorded") / col("Delivered"))
            .otherwise(lit(0.0))
            .alias("Live"),
    ];
    let mut order = vec![col("Run"), col("Delivered"), col("Recorded"), col("Live")];
    for scenario in &summary.scenarios {
        let name = format!("Accepted_{}", scenario.name);
        let accepted: Vec<f64> = summary
            .per_run
            .keys()
            .map(|run| scenario.per_run.get(run).copied().unwrap_or(0.0))
            .collect();
        columns.push(Series::new(&name, accepted));
        scaled.push((col(&name) * lit(scale)).alias(&name));
        order.push(col(&name));
    }
    let df = DataFrame::new(columns)?
        .lazy()
        .with_columns(scaled)
        .select(order)
        .collect()?;
    Ok(df)
}

pub fn write_tsv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let file = fs::File::create(path).map_err(|e| LumiError::io(path, e))?;
    CsvWriter::new(file).with_separator(b'\t').finish(df)?;
    info!(path = %path.display(), rows = df.height(), "run table written");
    Ok(())
}
