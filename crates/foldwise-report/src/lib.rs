//! foldwise-report: Renders finished evaluations.
//!
//! A self-contained HTML page per report, plus CSV exports of the raw
//! prediction ledger and the per-fold scores.

pub mod export;
pub mod html;

pub use export::{ledger_to_csv, write_ledger_csv, write_scores_csv};
pub use html::{generate_html, write_html_report};
