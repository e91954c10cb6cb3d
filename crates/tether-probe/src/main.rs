// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tether probe
//
// Entry point. Initialises logging, loads the bridge configuration and runs
// the probe scenarios against the loopback runtime.
//
//   tether-probe [--config FILE] [--assets DIR] [--json] [SCENARIO...]

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_asset::{AssetSource, DirAssets};
use tether_core::BridgeConfig;
use tether_core::error::{Result, TetherError};
use tether_testpkg::scenarios;

#[derive(Debug, Default)]
struct Options {
    config: Option<String>,
    assets: Option<String>,
    json: bool,
    only: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut opts = Options::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => opts.config = Some(args.next().ok_or_else(|| missing("--config"))?),
            "--assets" => opts.assets = Some(args.next().ok_or_else(|| missing("--assets"))?),
            "--json" => opts.json = true,
            _ => opts.only.push(arg),
        }
    }
    Ok(opts)
}

fn missing(flag: &str) -> TetherError {
    TetherError::Config(format!("{flag} needs a value"))
}

#[derive(Debug, Serialize)]
struct ScenarioReport {
    name: &'static str,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    millis: u64,
}

#[derive(Debug, Serialize)]
struct Report {
    started_at: DateTime<Utc>,
    config: BridgeConfig,
    scenarios: Vec<ScenarioReport>,
}

impl Report {
    fn failed(&self) -> usize {
        self.scenarios.iter().filter(|s| !s.passed).count()
    }
}

fn probe(opts: &Options) -> Result<Report> {
    let config = match &opts.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    config.validate()?;

    let assets: Arc<dyn AssetSource> = match &opts.assets {
        Some(dir) => Arc::new(DirAssets::new(dir)),
        None => scenarios::bundled_assets(),
    };

    for name in &opts.only {
        if !scenarios::ALL.iter().any(|(n, _)| *n == name.as_str()) {
            return Err(TetherError::Config(format!("unknown scenario `{name}`")));
        }
    }

    let mut report = Report {
        started_at: Utc::now(),
        config: config.clone(),
        scenarios: Vec::new(),
    };
    for (name, scenario) in scenarios::ALL {
        if !opts.only.is_empty() && !opts.only.iter().any(|n| n.as_str() == *name) {
            continue;
        }
        let start = Instant::now();
        let outcome = scenarios::run(&config, &assets, name, *scenario);
        report.scenarios.push(ScenarioReport {
            name: *name,
            passed: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
            millis: start.elapsed().as_millis() as u64,
        });
    }
    Ok(report)
}

fn print_summary(report: &Report) {
    for s in &report.scenarios {
        match &s.error {
            None => println!("  ok    {:<20} {:>6} ms", s.name, s.millis),
            Some(e) => println!("  FAIL  {:<20} {:>6} ms  {e}", s.name, s.millis),
        }
    }
    println!(
        "{} scenarios, {} passed, {} failed",
        report.scenarios.len(),
        report.scenarios.len() - report.failed(),
        report.failed()
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Tether probe starting");

    let run = parse_args(std::env::args().skip(1))
        .and_then(|opts| probe(&opts).map(|report| (opts.json, report)));
    let (json, report) = match run {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "probe could not run");
            return ExitCode::from(2);
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialise report");
                return ExitCode::from(2);
            }
        }
    } else {
        print_summary(&report);
    }

    if report.failed() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_flags_and_scenarios() {
        let opts = parse_args(args(&["--config", "c.json", "--json", "nulls", "errors"]))
            .expect("parse");
        assert_eq!(opts.config.as_deref(), Some("c.json"));
        assert!(opts.json);
        assert_eq!(opts.only, vec!["nulls", "errors"]);
    }

    #[test]
    fn flag_without_value_is_rejected() {
        assert!(matches!(
            parse_args(args(&["--assets"])),
            Err(TetherError::Config(_))
        ));
    }

    #[test]
    fn unknown_scenario_is_rejected() {
        let opts = Options {
            only: vec!["nope".into()],
            ..Default::default()
        };
        assert!(matches!(probe(&opts), Err(TetherError::Config(_))));
    }

    #[test]
    fn selected_scenarios_run_and_pass() {
        let opts = Options {
            only: vec!["constants".into(), "nulls".into()],
            ..Default::default()
        };
        let report = probe(&opts).expect("probe");
        assert_eq!(report.scenarios.len(), 2);
        assert_eq!(report.failed(), 0, "{report:?}");
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["scenarios"][0]["name"], "constants");
    }
}
