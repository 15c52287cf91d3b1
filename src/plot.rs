//! PNG plots of the luminosity summary.

use std::path::{Path, PathBuf};

use plotters::prelude::*;
use tracing::{info, warn};

use crate::aggregate::{efficiency, Summary};
use crate::error::{LumiError, Result};

pub const CUMULATIVE: &str = "cumulative.png";
pub const PER_RUN: &str = "per_run.png";
pub const EFFICIENCY: &str = "efficiency.png";

const SIZE: (u32, u32) = (1000, 600);
const SCENARIO_COLORS: [RGBColor; 6] = [
    GREEN,
    MAGENTA,
    CYAN,
    BLACK,
    YELLOW,
    RGBColor(255, 128, 0),
];

fn plot_err<E: std::fmt::Display>(e: E) -> LumiError {
    LumiError::Plot(e.to_string())
}

/// Renders every plot into `out_dir`; a plot that fails is logged and left
/// out. Returns the file names that were written.
pub fn render_all(summary: &Summary, out_dir: &Path, scale: f64, unit: &str) -> Vec<String> {
    let jobs: [(&str, fn(&Summary, &Path, f64, &str) -> Result<()>); 3] = [
        (CUMULATIVE, cumulative),
        (PER_RUN, per_run),
        (EFFICIENCY, efficiencies),
    ];
    let mut written = Vec::new();
    for (name, job) in jobs {
        let path: PathBuf = out_dir.join(name);
        match job(summary, &path, scale, unit) {
            Ok(()) => {
                info!(path = %path.display(), "plot written");
                written.push(name.to_string());
            }
            Err(e) => warn!(plot = name, error = %e, "plot skipped"),
        }
    }
    written
}

fn upper(max: f64) -> f64 {
    if max > 0.0 {
        max * 1.1
    } else {
        1.0
    }
}

fn run_axis(summary: &Summary) -> std::ops::Range<f64> {
    let first = summary.per_run.keys().next().copied().unwrap_or(0);
    let last = summary.per_run.keys().next_back().copied().unwrap_or(first);
    (first as f64 - 0.5)..(last as f64 + 0.5)
}

/// Cumulative delivered, recorded and accepted luminosity versus run number.
pub fn cumulative(summary: &Summary, path: &Path, scale: f64, unit: &str) -> Result<()> {
    if summary.per_run.is_empty() {
        return Err(LumiError::Plot("no runs to plot".into()));
    }
    let mut delivered = Vec::with_capacity(summary.per_run.len());
    let mut recorded = Vec::with_capacity(summary.per_run.len());
    let (mut d, mut r) = (0.0, 0.0);
    for (run, totals) in &summary.per_run {
        d += totals.delivered * scale;
        r += totals.recorded * scale;
        delivered.push((*run as f64, d));
        recorded.push((*run as f64, r));
    }

    let root = BitMapBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Integrated luminosity", ("sans-serif", 28))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(run_axis(summary), 0.0..upper(d))
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("Run")
        .y_desc(format!("Luminosity [{unit}]"))
        .x_label_formatter(&|x| format!("{:.0}", x))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(LineSeries::new(delivered, &BLUE))
        .map_err(plot_err)?
        .label("Delivered")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart
        .draw_series(LineSeries::new(recorded, &RED))
        .map_err(plot_err)?
        .label("Recorded")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    for (scenario, color) in summary.scenarios.iter().zip(SCENARIO_COLORS.iter().cycle()) {
        let mut acc = 0.0;
        let points: Vec<(f64, f64)> = summary
            .per_run
            .keys()
            .map(|run| {
                acc += scenario.per_run.get(run).copied().unwrap_or(0.0) * scale;
                (*run as f64, acc)
            })
            .collect();
        let color = *color;
        chart
            .draw_series(LineSeries::new(points, &color))
            .map_err(plot_err)?
            .label(format!("Accepted ({})", scenario.name))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

/// Recorded luminosity per run as bars.
pub fn per_run(summary: &Summary, path: &Path, scale: f64, unit: &str) -> Result<()> {
    if summary.per_run.is_empty() {
        return Err(LumiError::Plot("no runs to plot".into()));
    }
    let max = summary
        .per_run
        .values()
        .map(|t| t.recorded * scale)
        .fold(0.0, f64::max);

    let root = BitMapBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Recorded luminosity per run", ("sans-serif", 28))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(run_axis(summary), 0.0..upper(max))
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc("Run")
        .y_desc(format!("Recorded [{unit}]"))
        .x_label_formatter(&|x| format!("{:.0}", x))
        .draw()
        .map_err(plot_err)?;
    chart
        .draw_series(summary.per_run.iter().map(|(run, totals)| {
            let x = *run as f64;
            Rectangle::new(
                [(x - 0.4, 0.0), (x + 0.4, totals.recorded * scale)],
                RED.mix(0.7).filled(),
            )
        }))
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

/// Accepted over recorded luminosity per scenario, overall and in the window.
pub fn efficiencies(summary: &Summary, path: &Path, _scale: f64, _unit: &str) -> Result<()> {
    if summary.scenarios.is_empty() {
        return Err(LumiError::Plot("no scenarios to plot".into()));
    }
    let n = summary.scenarios.len();
    let root = BitMapBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Acceptance efficiency", ("sans-serif", 28))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5..(n as f64 - 0.5), 0.0..1.1)
        .map_err(plot_err)?;
    let names: Vec<String> = summary.scenarios.iter().map(|s| s.name.clone()).collect();
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n)
        .x_label_formatter(&|x| {
            let i = x.round();
            if (x - i).abs() < 1e-6 && i >= 0.0 {
                names.get(i as usize).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        })
        .y_desc("Accepted / recorded")
        .draw()
        .map_err(plot_err)?;

    let overall: Vec<(f64, f64)> = summary
        .scenarios
        .iter()
        .enumerate()
        .map(|(i, s)| (i as f64, efficiency(s.accepted, summary.totals.recorded)))
        .collect();
    let window: Vec<(f64, f64)> = summary
        .scenarios
        .iter()
        .enumerate()
        .map(|(i, s)| {
            (
                i as f64,
                efficiency(s.window_accepted, summary.window_totals.recorded),
            )
        })
        .collect();
    chart
        .draw_series(
            overall
                .iter()
                .map(|&(x, y)| Rectangle::new([(x - 0.35, 0.0), (x, y)], BLUE.mix(0.7).filled())),
        )
        .map_err(plot_err)?
        .label("All runs")
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], BLUE.mix(0.7).filled()));
    chart
        .draw_series(
            window
                .iter()
                .map(|&(x, y)| Rectangle::new([(x, 0.0), (x + 0.35, y)], GREEN.mix(0.7).filled())),
        )
        .map_err(plot_err)?
        .label(format!("Last {} days", summary.window_days))
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], GREEN.mix(0.7).filled()));
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::RunTotals;
    use std::collections::BTreeMap;

    #[test]
    fn empty_summary_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let summary = Summary {
            per_run: BTreeMap::new(),
            totals: RunTotals::default(),
            window_totals: RunTotals::default(),
            window_days: 7,
            last_run_time: None,
            scenarios: Vec::new(),
        };
        let written = render_all(&summary, dir.path(), 1e-6, "/pb");
        assert!(written.is_empty());
        assert!(!dir.path().join(CUMULATIVE).exists());
        assert!(!dir.path().join(EFFICIENCY).exists());
    }

    #[test]
    fn run_axis_pads_single_run() {
        let summary = Summary {
            per_run: BTreeMap::from([(146644, RunTotals::default())]),
            totals: RunTotals::default(),
            window_totals: RunTotals::default(),
            window_days: 7,
            last_run_time: None,
            scenarios: Vec::new(),
        };
        assert_eq!(run_axis(&summary), 146643.5..146644.5);
        assert_eq!(upper(0.0), 1.0);
    }
}
