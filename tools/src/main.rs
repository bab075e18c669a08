//! calib-runner: headless driver for the forecast calibration session.
//!
//! Usage:
//!   calib-runner --db rps.db --import monthly.json
//!   calib-runner --db rps.db --scope brand:Cardiox --method grid --save
//!   calib-runner --db rps.db --scope brand_canton:Cardiox:ZH --ipc-mode

use anyhow::{bail, Context, Result};
use rps_calibration_core::{
    command::{FitOptions, SessionCommand},
    config::CalibConfig,
    event::SessionEvent,
    fit_strategy::FitMethod,
    metrics::{format_metric, MetricSummary},
    scope::ScopeKey,
    session::{ActiveParameters, CalibrationSession, FitCandidate},
    store::CalibStore,
    types::{BrandKey, CantonKey, TimeSeriesRow},
    window::TrainWindow,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::Path;

#[derive(serde::Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum IpcControl {
    GetState,
    Quit,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum IpcLine {
    Control(IpcControl),
    Session(SessionCommand),
}

#[derive(serde::Serialize)]
struct UiState<'a> {
    scope:      &'a ScopeKey,
    rows:       usize,
    window:     Option<TrainWindow>,
    active:     Option<&'a ActiveParameters>,
    candidate:  Option<&'a FitCandidate>,
    last_event: Option<&'a SessionEvent>,
    train:      Option<MetricSummary>,
    validation: Option<MetricSummary>,
    /// Scope picker options.
    brands:     Vec<BrandKey>,
    cantons:    Vec<CantonKey>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let save = args.iter().any(|a| a == "--save");
    let weighted = args.iter().any(|a| a == "--weighted");
    let db = arg_value(&args, "--db").unwrap_or("rps_calibration.db");
    let data_dir = arg_value(&args, "--data-dir").unwrap_or("./data");
    let scope = parse_scope(arg_value(&args, "--scope").unwrap_or("global"))?;
    let method = parse_method(arg_value(&args, "--method").unwrap_or("bounded"))?;
    let lag = arg_value(&args, "--lag").map(str::parse::<usize>).transpose()?;

    let config = if Path::new(&format!("{data_dir}/calibration.json")).exists() {
        CalibConfig::load(data_dir)?
    } else {
        log::warn!("no calibration.json in {data_dir}, using defaults");
        CalibConfig::default()
    };

    let store = CalibStore::open(db).with_context(|| format!("cannot open store {db}"))?;
    store.migrate()?;

    if let Some(path) = arg_value(&args, "--import") {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {path}"))?;
        let rows: Vec<TimeSeriesRow> = serde_json::from_str(&content)?;
        store.upsert_series(&rows)?;
    }

    if !ipc_mode {
        println!("RPS forecast calibration (calib-runner)");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!("  scope:     {scope}");
        println!("  method:    {method}");
        println!();
    }

    let mut session = CalibrationSession::open_from_store(config, store, scope)?;

    if ipc_mode {
        run_ipc_loop(&mut session)?;
    } else {
        let mut options = FitOptions::new(method).weighted(weighted);
        if let Some(lag) = lag {
            options = options.with_lag(lag);
        }
        session.run_fit(&options);
        session.set_active_from_fit();
        if save {
            session.save_active()?;
        }
        print_summary(&session);
    }

    Ok(())
}

fn run_ipc_loop(session: &mut CalibrationSession) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let line: IpcLine = match serde_json::from_str(&buffer) {
            Ok(l) => l,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        match line {
            IpcLine::Control(IpcControl::Quit) => break,
            IpcLine::Control(IpcControl::GetState) => {}
            IpcLine::Session(cmd) => {
                if let Err(e) = session.apply(cmd) {
                    // Store failures end the command, not the session.
                    log::error!("session command failed: {e}");
                    let err_json = serde_json::json!({ "error": e.to_string() });
                    writeln!(stdout, "{}", err_json)?;
                    stdout.flush()?;
                    continue;
                }
            }
        }
        let state = build_ui_state(session);
        writeln!(stdout, "{}", serde_json::to_string(&state)?)?;
        stdout.flush()?;
    }
    Ok(())
}

fn build_ui_state(session: &CalibrationSession) -> UiState<'_> {
    let evaluation = session.evaluation();
    let catalog = session.catalog();
    let cantons = match session.scope() {
        ScopeKey::Global => catalog.cantons(),
        ScopeKey::Brand { brand } | ScopeKey::BrandCanton { brand, .. } => catalog.cantons_for(brand),
    };
    UiState {
        scope:      session.scope(),
        rows:       session.scoped_rows().len(),
        window:     session.train_window(),
        active:     session.active(),
        candidate:  session.candidate(),
        last_event: session.journal().last(),
        train:      evaluation.map(|e| e.train),
        validation: evaluation.map(|e| e.validation),
        brands:     catalog.brands(),
        cantons,
    }
}

fn print_summary(session: &CalibrationSession) {
    println!("=== CALIBRATION SUMMARY ===");
    println!("  scope:          {}", session.scope());
    println!("  rows in scope:  {}", session.scoped_rows().len());
    if let Some(w) = session.train_window() {
        println!("  train window:   {} .. {}", w.start.format("%Y-%m"), w.end.format("%Y-%m"));
    }
    match session.candidate() {
        Some(c) => {
            println!("  fit method:     {}", c.method);
            println!("  fit rows:       {}", c.rows);
            println!("  alpha:          {:.5}", c.result.alpha);
            println!("  beta:           {:.5}", c.result.beta);
            if !c.result.converged {
                println!("  WARNING: fallback alpha/beta used (not enough signal in the training window)");
            }
        }
        None => println!("  (no fit: scope has no rows)"),
    }

    if let Some(e) = session.evaluation() {
        println!();
        println!("=== ACCURACY ===");
        for (label, m) in [("train", e.train), ("validation", e.validation)] {
            println!(
                "  {label:<10} rows={:<5} MAPE={:<7} SMAPE={:<7} WAPE={}",
                m.rows,
                format_metric(m.mape),
                format_metric(m.smape),
                format_metric(m.wape)
            );
        }
    }

    for event in session.journal() {
        if let SessionEvent::Warning { message, .. } = event {
            println!("  warning: {message}");
        }
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

/// `global`, `brand:<brand>` or `brand_canton:<brand>:<canton>`.
fn parse_scope(s: &str) -> Result<ScopeKey> {
    let parts: Vec<&str> = s.splitn(3, ':').collect();
    Ok(match parts.as_slice() {
        ["global"] => ScopeKey::Global,
        ["brand", brand] => ScopeKey::brand(*brand),
        ["brand_canton", brand, canton] => ScopeKey::brand_canton(*brand, *canton),
        _ => bail!("invalid scope '{s}': expected global, brand:<b> or brand_canton:<b>:<c>"),
    })
}

fn parse_method(s: &str) -> Result<FitMethod> {
    Ok(match s {
        "ols" => FitMethod::Ols,
        "bounded" => FitMethod::BoundedLs,
        "clamped" => FitMethod::BoundedLsClamped,
        "grid" => FitMethod::GridMape,
        _ => bail!("invalid method '{s}': expected ols, bounded, clamped or grid"),
    })
}
