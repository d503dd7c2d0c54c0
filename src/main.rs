use anyhow::Context;
use dvh_check::adapter::{StaticDvhSource, StaticPlanSource, StaticStructureSource};
use dvh_check::dvh::{CumulativeDvh, DEFAULT_BIN_WIDTH_GY};
use dvh_check::protocol::ProtocolCatalog;
use dvh_check::scorecard::ScorecardState;
use dvh_check::source::PlanFiles;
use dvh_check::types::StructureInfo;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// Volume spread evenly between two doses, as a cumulative histogram.
fn uniform(volume_cc: f64, low_gy: f64, high_gy: f64) -> CumulativeDvh {
    let bins = (high_gy / DEFAULT_BIN_WIDTH_GY).ceil() as usize;
    let counts = (0..=bins)
        .map(|i| {
            let dose = i as f64 * DEFAULT_BIN_WIDTH_GY;
            if dose <= low_gy {
                volume_cc
            } else {
                volume_cc * ((high_gy - dose) / (high_gy - low_gy)).max(0.0)
            }
        })
        .collect();
    CumulativeDvh::new(counts)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/protocols/tg101.json");
    let catalog = ProtocolCatalog::from_path(path).context("load bundled TG101 catalog")?;

    let plan = PlanFiles::new("RS.demo", "RD.demo");
    let mut plans = StaticPlanSource::new();
    plans.insert("Lung SBRT", plan.clone());

    let mut structures = StaticStructureSource::new();
    let mut dvhs = StaticDvhSource::new();
    for (key, name, kind, dvh) in [
        ("1", "BODY", "EXTERNAL", uniform(18000.0, 0.0, 54.0)),
        ("2", "Heart_PRV", "ORGAN", uniform(640.0, 2.0, 21.5)),
        ("3", "SpinalCord", "ORGAN", uniform(28.0, 1.0, 12.8)),
        ("4", "Lungs", "ORGAN", uniform(3900.0, 0.5, 19.0)),
        ("5", "Esophagus", "ORGAN", uniform(32.0, 1.5, 16.2)),
    ] {
        structures.insert("RS.demo", key, StructureInfo::new(name, kind));
        dvhs.insert(&plan, key, dvh);
    }
    structures.insert("RS.demo", "6", StructureInfo::new("Iso", "MARKER"));

    let mut state = ScorecardState::new(Arc::new(catalog), structures, dvhs)?;
    state.refresh_plans(&plans)?;
    let summary = state.set_fractionation("3Fx")?;

    for row in state.rows().iter().filter(|r| r.is_bound()) {
        println!(
            "{:<14} {:<16} {:<20} {:>8} {}",
            row.template_roi(),
            row.roi_name,
            row.constraint(),
            row.constraint_calc
                .map(|v| format!("{v:.2}"))
                .unwrap_or_default(),
            row.pass_fail
        );
    }
    println!(
        "Rows: {}  Pass: {}  Fail: {}  Unresolved: {}  Unbound: {}",
        summary.rows, summary.passed, summary.failed, summary.unresolved, summary.unbound
    );
    Ok(())
}
