//! HTML report generator.
//!
//! Produces a self-contained HTML file with all CSS/JS inlined.

use anyhow::Result;
use std::path::Path;

use foldwise_core::importance::{ImportanceRecord, ImportanceWindow};
use foldwise_core::report::{EvaluationMode, EvaluationReport};
use foldwise_core::statistics::ScoreSummary;

/// Escape a string for safe HTML insertion.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn window_label(window: &ImportanceWindow) -> String {
    match window {
        ImportanceWindow::Run => "whole run".to_string(),
        ImportanceWindow::Repeat { repeat } => format!("repeat {repeat}"),
        ImportanceWindow::Final => "held-out test".to_string(),
        ImportanceWindow::Aggregate => "aggregate".to_string(),
    }
}

/// Generate an HTML report from an evaluation report.
pub fn generate_html(report: &EvaluationReport) -> String {
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!(
        "<title>foldwise report: {}</title>\n",
        html_escape(&report.name)
    ));
    html.push_str("<style>\n");
    html.push_str(CSS);
    html.push_str("</style>\n");
    html.push_str("</head>\n<body>\n");

    // Header
    let mode = match report.mode {
        EvaluationMode::CrossValidation => format!(
            "{} folds x {} repeats",
            report.n_splits, report.n_repeats
        ),
        EvaluationMode::HeldOut => "held-out test".to_string(),
    };
    html.push_str("<header>\n");
    html.push_str(&format!("<h1>{}</h1>\n", html_escape(&report.name)));
    html.push_str(&format!(
        "<p class=\"meta\">Model: <strong>{}</strong>{} | {} target <code>{}</code> | {} features | {} | {}</p>\n",
        html_escape(&report.model.name),
        if report.model.scale { " (scaled)" } else { "" },
        report.problem_type,
        html_escape(&report.target_keys.join(", ")),
        report.feature_keys.len(),
        mode,
        report.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    html.push_str("</header>\n");

    // Summary
    html.push_str("<section class=\"dashboard\">\n");
    html.push_str("<h2>Summary</h2>\n");
    html.push_str(&summary_table(&report.summary, report.train_summary.as_deref()));
    html.push_str("</section>\n");

    // Per-fold scores
    html.push_str("<section class=\"results\">\n");
    html.push_str("<h2>Folds</h2>\n");
    html.push_str("<table class=\"results-table\" id=\"folds\">\n<thead><tr>");
    let mut headers = vec!["Fold".to_string(), "Train".into(), "Test".into()];
    headers.extend(report.metric_names.iter().cloned());
    headers.push("Best params".into());
    for (i, header) in headers.iter().enumerate() {
        html.push_str(&format!(
            "<th onclick=\"sortTable('folds', {i})\">{}</th>",
            html_escape(header)
        ));
    }
    html.push_str("</tr></thead>\n<tbody>\n");
    for fold in &report.folds {
        let class = if fold.degenerate_class_fallbacks > 0 { " class=\"warn\"" } else { "" };
        html.push_str(&format!(
            "<tr{class}><td>{}</td><td>{}</td><td>{}</td>",
            fold.fold, fold.n_train, fold.n_test
        ));
        for score in &fold.test_scores {
            html.push_str(&format!("<td>{score:.4}</td>"));
        }
        let params = fold
            .best_params
            .as_ref()
            .map(|p| {
                p.iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_else(|| "-".to_string());
        html.push_str(&format!("<td>{}</td></tr>\n", html_escape(&params)));
    }
    html.push_str("</tbody></table>\n");
    html.push_str("</section>\n");

    // Importances
    if !report.importances.is_empty() {
        html.push_str("<section class=\"importances\">\n");
        html.push_str("<h2>Feature importance</h2>\n");
        if let Some(record) = headline_importance(&report.importances) {
            html.push_str(&generate_bar_chart(record));
        }
        for (i, record) in report.importances.iter().enumerate() {
            html.push_str(&importance_table(record, i));
        }
        html.push_str("</section>\n");
    }

    // Raw JSON
    html.push_str("<section class=\"raw-data\">\n");
    html.push_str("<details>\n<summary>Raw JSON Data</summary>\n");
    html.push_str("<pre><code>");
    html.push_str(
        &serde_json::to_string_pretty(report)
            .unwrap_or_default()
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
    );
    html.push_str("</code></pre>\n");
    html.push_str("</details>\n</section>\n");

    // JavaScript for sorting
    html.push_str("<script>\n");
    html.push_str(JS);
    html.push_str("</script>\n");

    html.push_str("</body>\n</html>");
    html
}

/// Write an HTML report to a file.
pub fn write_html_report(report: &EvaluationReport, path: &Path) -> Result<()> {
    let html = generate_html(report);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, html)?;
    Ok(())
}

fn summary_table(summary: &[ScoreSummary], train: Option<&[ScoreSummary]>) -> String {
    let mut table = String::from("<table class=\"summary\">\n<thead><tr><th>Metric</th><th>Mean</th><th>Std</th><th>Repeat std</th><th>Min</th><th>Max</th><th>Folds</th>");
    if train.is_some() {
        table.push_str("<th>Train mean</th>");
    }
    table.push_str("</tr></thead>\n<tbody>\n");
    for s in summary {
        table.push_str(&format!(
            "<tr><td>{}</td><td>{:.4}</td><td>{:.4}</td><td>{:.4}</td><td>{:.4}</td><td>{:.4}</td><td>{}</td>",
            html_escape(&s.metric),
            s.mean,
            s.std,
            s.repeat_std,
            s.min,
            s.max,
            s.n_folds
        ));
        if let Some(train) = train {
            match train.iter().find(|t| t.metric == s.metric) {
                Some(t) => table.push_str(&format!("<td>{:.4}</td>", t.mean)),
                None => table.push_str("<td>-</td>"),
            }
        }
        table.push_str("</tr>\n");
    }
    table.push_str("</tbody></table>\n");
    table
}

/// The record charted at the top: the first aggregate, else the first final snapshot.
fn headline_importance(records: &[ImportanceRecord]) -> Option<&ImportanceRecord> {
    records
        .iter()
        .find(|r| r.window == ImportanceWindow::Aggregate)
        .or_else(|| records.iter().find(|r| r.window == ImportanceWindow::Final))
}

fn importance_table(record: &ImportanceRecord, index: usize) -> String {
    let id = format!("importance-{index}");
    let mut table = format!(
        "<h3>{} ({} on {}, {})</h3>\n<table class=\"importance\" id=\"{id}\">\n",
        html_escape(&record.method),
        record.scope,
        record.split,
        window_label(&record.window)
    );
    table.push_str(&format!(
        "<thead><tr><th onclick=\"sortTable('{id}', 0)\">Feature</th><th onclick=\"sortTable('{id}', 1)\">Score</th></tr></thead>\n<tbody>\n"
    ));
    for (feature, score) in &record.scores {
        table.push_str(&format!(
            "<tr><td>{}</td><td>{score:.6}</td></tr>\n",
            html_escape(feature)
        ));
    }
    table.push_str("</tbody></table>\n");
    table
}

fn generate_bar_chart(record: &ImportanceRecord) -> String {
    let bar_height = 24;
    let max_width = 400;
    let padding = 8;
    let label_width = 200;

    let mut features: Vec<(&String, f64)> = record
        .scores
        .iter()
        .map(|(feature, score)| (feature, score.abs()))
        .collect();
    features.sort_by(|a, b| b.1.total_cmp(&a.1));
    let largest = features.first().map(|f| f.1).unwrap_or(0.0);

    let total_height = features.len() * (bar_height + padding) + padding;

    let mut svg = format!(
        "<svg width=\"{}\" height=\"{}\" xmlns=\"http://www.w3.org/2000/svg\">\n",
        label_width + max_width + 80,
        total_height
    );

    for (i, (feature, score)) in features.iter().enumerate() {
        let y = i * (bar_height + padding) + padding;
        let width = if largest > 0.0 {
            (score / largest * max_width as f64) as usize
        } else {
            0
        };

        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"14\" fill=\"currentColor\" text-anchor=\"end\" dominant-baseline=\"middle\">{}</text>\n",
            label_width - 10,
            y + bar_height / 2,
            html_escape(feature)
        ));
        svg.push_str(&format!(
            "  <rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"#3b82f6\" rx=\"4\"/>\n",
            label_width, y, width, bar_height
        ));
        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"12\" fill=\"currentColor\" dominant-baseline=\"middle\">{:.4}</text>\n",
            label_width + width + 8,
            y + bar_height / 2,
            score
        ));
    }

    svg.push_str("</svg>\n");
    svg
}

const CSS: &str = r#"
:root { --bg: #fff; --fg: #1a1a1a; --border: #e5e7eb; --warn: #fef3c7; }
@media (prefers-color-scheme: dark) {
  :root { --bg: #111827; --fg: #f9fafb; --border: #374151; --warn: #78350f; }
}
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; margin: 0; padding: 2rem; background: var(--bg); color: var(--fg); }
h1, h2 { margin-top: 2rem; }
.meta { color: #6b7280; }
table { border-collapse: collapse; width: 100%; margin: 1rem 0; }
th, td { border: 1px solid var(--border); padding: 0.5rem 1rem; text-align: left; }
th { background: var(--border); cursor: pointer; }
.warn { background: var(--warn); }
pre { overflow-x: auto; padding: 1rem; background: var(--border); border-radius: 8px; }
code { font-family: 'JetBrains Mono', 'Fira Code', monospace; font-size: 0.85rem; }
details { margin: 1rem 0; }
summary { cursor: pointer; font-weight: bold; }
svg { margin: 1rem 0; }
"#;

const JS: &str = r#"
function sortTable(id, col) {
  const table = document.getElementById(id);
  const tbody = table.querySelector('tbody');
  const rows = Array.from(tbody.querySelectorAll('tr'));
  const asc = table.dataset.sortCol == col && table.dataset.sortDir == 'asc' ? false : true;
  rows.sort((a, b) => {
    const va = a.cells[col].textContent;
    const vb = b.cells[col].textContent;
    const na = parseFloat(va), nb = parseFloat(vb);
    const cmp = isNaN(na) || isNaN(nb) ? va.localeCompare(vb) : na - nb;
    return asc ? cmp : -cmp;
  });
  table.dataset.sortCol = col;
  table.dataset.sortDir = asc ? 'asc' : 'desc';
  rows.forEach(r => tbody.appendChild(r));
}
"#;
