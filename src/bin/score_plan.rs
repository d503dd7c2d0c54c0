use anyhow::{bail, Context};
use clap::Parser;
use dvh_check::aliases::MATCH_THRESHOLD;
use dvh_check::integration::PlanExportSource;
use dvh_check::protocol::ProtocolCatalog;
use dvh_check::scorecard::{ScorecardRow, ScorecardState, ScorecardSummary};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "score_plan")]
#[command(version)]
#[command(about = "Score exported treatment plans against a DVH protocol", long_about = None)]
struct Args {
    /// Protocol catalog (.json, .yaml or .yml)
    #[arg(long)]
    catalog: PathBuf,

    /// Plan export file; repeat to score several plans
    #[arg(long = "plan", required = true)]
    plans: Vec<PathBuf>,

    /// Defaults to the first protocol in the catalog
    #[arg(long)]
    protocol: Option<String>,

    #[arg(long)]
    fractionation: Option<String>,

    /// Minimum match score (0-100) for automatic ROI binding
    #[arg(long, default_value_t = MATCH_THRESHOLD)]
    threshold: u8,

    /// Force a template ROI onto a structure, as TEMPLATE=STRUCTURE
    #[arg(long = "override", value_parser = parse_override)]
    overrides: Vec<(String, String)>,

    /// Leave a template ROI unbound
    #[arg(long = "exclude")]
    excluded: Vec<String>,

    /// Print rows as JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn parse_override(raw: &str) -> Result<(String, String), String> {
    let (template, structure) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TEMPLATE=STRUCTURE, got {raw}"))?;
    let template = template.trim();
    if template.is_empty() {
        return Err(format!("invalid --override entry {raw}"));
    }
    Ok((template.to_string(), structure.trim().to_string()))
}

#[derive(Serialize)]
struct PlanReport<'a> {
    plan: &'a str,
    protocol: &'a str,
    fractionation: &'a str,
    max_dose_volume_cc: f64,
    summary: ScorecardSummary,
    rows: &'a [ScorecardRow],
}

fn print_table(plan: &str, rows: &[ScorecardRow], summary: &ScorecardSummary) {
    println!("Plan: {plan}");
    for row in rows {
        println!(
            "  {:<16} {:<18} {:<20} {:>9} {:>9} {:>9} {:>9} {:>4}",
            row.template_roi(),
            row.roi_name,
            row.constraint(),
            cell(row.volume),
            cell(row.mean_dose),
            cell(row.max_dose),
            cell(row.constraint_calc),
            row.pass_fail
        );
    }
    println!(
        "  Rows: {}  Pass: {}  Fail: {}  Unresolved: {}  Unbound: {}",
        summary.rows, summary.passed, summary.failed, summary.unresolved, summary.unbound
    );
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_default()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let catalog = ProtocolCatalog::from_path(&args.catalog)
        .with_context(|| format!("loading catalog {}", args.catalog.display()))?;
    let exports =
        PlanExportSource::from_paths(args.plans.as_slice()).context("loading plan exports")?;

    let max_dose_volume_cc = catalog.max_dose_volume_cc;
    let mut state = ScorecardState::new(Arc::new(catalog), exports.clone(), exports.clone())?
        .with_match_threshold(args.threshold);
    if let Some(protocol) = args.protocol.as_deref() {
        let _ = state.set_protocol(protocol)?;
    }
    if let Some(fractionation) = args.fractionation.as_deref() {
        let _ = state.set_fractionation(fractionation)?;
    }
    state.refresh_plans(&exports)?;

    let plan_ids = state.plan_ids();
    if plan_ids.is_empty() {
        bail!("no plans to score");
    }

    if !args.json {
        let selection = state.selection();
        println!("Protocol: {} {}", selection.protocol, selection.fractionation);
        println!("Max dose point defined as {max_dose_volume_cc}cc");
    }

    let mut reports = Vec::new();
    for plan_id in &plan_ids {
        let _ = state.set_plan(plan_id)?;
        for template in &args.excluded {
            let _ = state.exclude_roi(template);
        }
        for (template, structure) in &args.overrides {
            let _ = state
                .set_override(template, structure)
                .with_context(|| format!("override {template}={structure} on plan {plan_id}"))?;
        }
        let summary = state.rebind_and_evaluate();
        info!(plan = %plan_id, failed = summary.failed, "plan scored");

        if args.json {
            reports.push(serde_json::to_value(PlanReport {
                plan: plan_id,
                protocol: &state.selection().protocol,
                fractionation: &state.selection().fractionation,
                max_dose_volume_cc,
                summary,
                rows: state.rows(),
            })?);
        } else {
            print_table(plan_id, state.rows(), &summary);
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(())
}
