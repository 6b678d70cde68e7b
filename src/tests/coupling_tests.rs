//! Scenario tests: complete coupled runs over the reference adapters.

use crate::{check_arguments, Cli, EXIT_BAD_ARGS};
use approx::assert_relative_eq;
use clap::Parser;
use std::fs;
use std::thread;
use tempfile::TempDir;
use tide_coupler_lib::collective::{LocalCollective, Reducer, SerialReducer};
use tide_coupler_lib::config::{BoundaryConfig, CouplerConfig, HydroConfig, SurrogateConfig};
use tide_coupler_lib::exchange::{ExchangeWarning, MemorySink, SeriesFileSink};
use tide_coupler_lib::feedback::FeedbackPolicy;
use tide_coupler_lib::model::ModelAdapter;
use tide_coupler_lib::scheduler::{CouplingScheduler, CouplingSettings, RunSummary, SchedulerState};
use tide_coupler_lib::synthetic::{HydrographSurrogate, ReservoirHydro};
use tide_coupler_lib::{CouplingError, CouplingMode, Quantity};

const HOUR: f64 = 3600.0;
const RUN_END: f64 = 144.0 * HOUR;

fn boundary(node_count: usize) -> BoundaryConfig {
    BoundaryConfig {
        name: "river inflow".to_string(),
        node_count,
        length_m: 150.0,
    }
}

fn hydro_config(dt_hours: f64) -> HydroConfig {
    HydroConfig {
        dt_seconds: dt_hours * HOUR,
        final_seconds: RUN_END,
        ..HydroConfig::default()
    }
}

fn settings(node_count: usize) -> CouplingSettings {
    CouplingSettings {
        boundary_nodes: node_count,
        boundary_length: 150.0,
        ..CouplingSettings::default()
    }
}

fn scheduler<R: Reducer>(
    mode: CouplingMode,
    reducer: R,
    hydro: HydroConfig,
    surrogate: SurrogateConfig,
    node_count: usize,
) -> CouplingScheduler<R> {
    let (rank, size) = (reducer.rank(), reducer.size());
    CouplingScheduler::new(
        mode,
        settings(node_count),
        reducer,
        Box::new(ReservoirHydro::new(hydro, &boundary(node_count), rank, size)),
        Box::new(HydrographSurrogate::new(surrogate, rank)),
        Box::new(MemorySink::new()),
    )
}

fn serial_run(mode: CouplingMode, hydro_dt_hours: f64) -> RunSummary {
    scheduler(
        mode,
        SerialReducer,
        hydro_config(hydro_dt_hours),
        SurrogateConfig::default(),
        4,
    )
    .run()
    .unwrap()
}

/// Run `mode` on `size` in-process ranks and return every rank's summary.
fn ranked_run(mode: CouplingMode, size: usize, node_count: usize) -> Vec<RunSummary> {
    let handles: Vec<_> = LocalCollective::group(size)
        .into_iter()
        .map(|comm| {
            thread::spawn(move || {
                scheduler(
                    mode,
                    comm,
                    hydro_config(6.0),
                    SurrogateConfig::default(),
                    node_count,
                )
                .run()
                .unwrap()
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn one_way_run_invokes_driven_side_per_driven_step() {
    for hydro_dt_hours in [1.5, 6.0, 480.0] {
        let summary = serial_run(CouplingMode::DrivenByDriving, hydro_dt_hours);
        let expected = (144.0 / hydro_dt_hours).ceil() as usize;

        assert_eq!(summary.state, SchedulerState::BothFinished);
        assert_eq!(
            summary.driven_invocations, expected,
            "driven dt = {hydro_dt_hours} h"
        );
        assert_eq!(summary.final_driving_clock, RUN_END);
        assert_eq!(summary.final_driven_clock, RUN_END);
    }
}

#[test]
fn coarse_driven_step_finishes_in_one_iteration() {
    let summary = serial_run(CouplingMode::DrivenByDriving, 480.0);
    assert_eq!(summary.iterations, 1);
    assert_eq!(summary.driving_invocations, 1);
    assert_eq!(summary.history.len(), 1);
    assert_eq!(summary.history[0].time, RUN_END);
}

#[test]
fn exchange_times_strictly_increase() {
    let summary = serial_run(CouplingMode::DrivenByDriving, 1.5);
    assert_eq!(summary.history.len(), summary.driving_invocations);
    assert!(summary.history.windows(2).all(|w| w[0].time < w[1].time));
    // Trapezoid between consecutive exchanges
    for w in summary.history.windows(2) {
        let expected = 0.5 * (w[0].value + w[1].value) * (w[1].time - w[0].time);
        assert_relative_eq!(w[1].area, expected, max_relative = 1e-12);
    }
}

#[test]
fn hydro_driving_surrogate_runs_every_hour() {
    let summary = serial_run(CouplingMode::DrivingByDriven, 0.5);
    assert_eq!(summary.state, SchedulerState::BothFinished);
    assert_eq!(summary.driven_invocations, 144);
    assert_eq!(summary.driving_invocations, 144);
    assert_eq!(summary.history[0].time, HOUR);
}

#[test]
fn two_way_runs_finish_in_both_orders() {
    let surrogate_first = serial_run(CouplingMode::TwoWayDrivenFirst, 6.0);
    assert_eq!(surrogate_first.state, SchedulerState::BothFinished);
    assert_eq!(surrogate_first.driven_invocations, 24);

    let hydro_first = serial_run(CouplingMode::TwoWayDrivingFirst, 0.5);
    assert_eq!(hydro_first.state, SchedulerState::BothFinished);
    assert_eq!(hydro_first.driven_invocations, 144);
    assert_eq!(hydro_first.final_driven_clock, RUN_END);
}

#[test]
fn feedback_changes_the_surrogate_prediction() {
    let one_way = serial_run(CouplingMode::DrivenByDriving, 6.0);
    let two_way = serial_run(CouplingMode::TwoWayDrivenFirst, 6.0);

    assert_eq!(one_way.history.len(), two_way.history.len());
    assert_eq!(one_way.history[0].time, two_way.history[0].time);
    // The surrogate blends in the fed-back hydro level from its first prediction
    assert_ne!(one_way.history[0].value, two_way.history[0].value);
    assert_ne!(one_way.history[5].value, two_way.history[5].value);
}

#[test]
fn nearest_extreme_policy_runs() {
    let mut scheduler = CouplingScheduler::new(
        CouplingMode::TwoWayDrivenFirst,
        CouplingSettings {
            feedback_policy: FeedbackPolicy::NearestExtreme,
            ..settings(4)
        },
        SerialReducer,
        Box::new(ReservoirHydro::new(hydro_config(6.0), &boundary(4), 0, 1)),
        Box::new(HydrographSurrogate::new(SurrogateConfig::default(), 0)),
        Box::new(MemorySink::new()),
    );
    let summary = scheduler.run().unwrap();
    assert_eq!(summary.state, SchedulerState::BothFinished);
    assert_eq!(summary.driven_invocations, 24);
}

#[test]
fn hydro_finishes_alone_after_surrogate_ends() {
    let surrogate = SurrogateConfig {
        iterations: 72,
        ..SurrogateConfig::default()
    };
    let mut scheduler = scheduler(
        CouplingMode::DrivenByDriving,
        SerialReducer,
        hydro_config(6.0),
        surrogate,
        4,
    );
    let summary = scheduler.run().unwrap();

    assert_eq!(summary.state, SchedulerState::BothFinished);
    assert_eq!(summary.final_driving_clock, 72.0 * HOUR);
    assert_eq!(summary.final_driven_clock, RUN_END);
    assert_eq!(summary.driven_invocations, 13);
    assert_eq!(summary.history.len(), 12);

    let exchange = &scheduler.context().unwrap().exchange;
    assert!(exchange.is_idle());
    assert!(exchange.time_increment() >= 10.0 * RUN_END);
    assert!(scheduler.hydro().is_finished());
}

#[test]
fn decreasing_inflow_is_reported_not_fatal() {
    let surrogate = SurrogateConfig {
        quantity: Quantity::Flux,
        base_level: 100.0,
        amplitude: 900.0,
        ..SurrogateConfig::default()
    };
    let mut scheduler = scheduler(
        CouplingMode::DrivenByDriving,
        SerialReducer,
        hydro_config(6.0),
        surrogate,
        4,
    );
    let summary = scheduler.run().unwrap();

    assert_eq!(summary.state, SchedulerState::BothFinished);
    assert!(!summary.warnings.is_empty());
    assert!(summary
        .warnings
        .iter()
        .all(|w| matches!(w, ExchangeWarning::NegativeInflow { .. })));
    for sample in &summary.history {
        assert_relative_eq!(sample.volume, sample.area * 150.0, max_relative = 1e-12);
    }
}

#[test]
fn boundary_file_holds_last_exchange() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fort.20");
    let mut scheduler = CouplingScheduler::new(
        CouplingMode::DrivenByDriving,
        settings(3),
        SerialReducer,
        Box::new(ReservoirHydro::new(hydro_config(6.0), &boundary(3), 0, 1)),
        Box::new(HydrographSurrogate::new(SurrogateConfig::default(), 0)),
        Box::new(SeriesFileSink::new(&path, 4)),
    );
    let summary = scheduler.run().unwrap();

    let last = summary.history.last().unwrap().value;
    let contents = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2 * 3);
    let expected = format!("{:10.6}", last);
    assert!(lines.iter().all(|l| *l == expected));
}

#[test]
fn ranks_agree_on_one_way_run() {
    let summaries = ranked_run(CouplingMode::DrivenByDriving, 3, 7);
    for summary in &summaries {
        assert_eq!(summary, &summaries[0]);
    }
    assert_eq!(summaries[0].driven_invocations, 24);

    // Same exchanged values as a single rank: the surrogate only runs on rank 0
    let serial = scheduler(
        CouplingMode::DrivenByDriving,
        SerialReducer,
        hydro_config(6.0),
        SurrogateConfig::default(),
        7,
    )
    .run()
    .unwrap();
    assert_eq!(serial.history, summaries[0].history);
}

#[test]
fn ranks_agree_on_two_way_runs() {
    for mode in [CouplingMode::TwoWayDrivenFirst, CouplingMode::TwoWayDrivingFirst] {
        let summaries = ranked_run(mode, 3, 7);
        for summary in &summaries {
            assert_eq!(summary, &summaries[0], "mode {mode}");
        }
        assert_eq!(summaries[0].state, SchedulerState::BothFinished);

        let serial = scheduler(mode, SerialReducer, hydro_config(6.0), SurrogateConfig::default(), 7)
            .run()
            .unwrap();
        assert_eq!(serial.history.len(), summaries[0].history.len());
        for (a, b) in serial.history.iter().zip(&summaries[0].history) {
            assert_relative_eq!(a.value, b.value, max_relative = 1e-9);
        }
    }
}

#[test]
fn unknown_mode_is_rejected() {
    for code in ["", "nda", "AnA", "ndAdnA"] {
        assert!(matches!(
            code.parse::<CouplingMode>(),
            Err(CouplingError::UnknownCouplingMode(_))
        ));
    }
}

#[test]
fn command_line_surface() {
    let cli = Cli::try_parse_from(["tide-coupler", "ndAdn", "2", "--plot"]).unwrap();
    assert_eq!(cli.mode, "ndAdn");
    assert_eq!(cli.boundary, 2);
    assert!(cli.plot);
    assert!(cli.report.is_none());

    // Missing or malformed boundary id
    assert!(Cli::try_parse_from(["tide-coupler", "ndA"]).is_err());
    assert!(Cli::try_parse_from(["tide-coupler", "ndA", "first"]).is_err());
}

#[test]
fn bad_mode_or_boundary_exits_with_bad_args() {
    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }
    let config = CouplerConfig::default();

    let cli = parse(&["tide-coupler", "AdndA", "2"]);
    assert_eq!(check_arguments(&cli, &config), Ok(CouplingMode::TwoWayDrivingFirst));

    let cli = parse(&["tide-coupler", "AnA", "1"]);
    assert_eq!(check_arguments(&cli, &config), Err(EXIT_BAD_ARGS));

    // Two boundary strings are configured by default
    for boundary in ["0", "3"] {
        let cli = parse(&["tide-coupler", "ndA", boundary]);
        assert_eq!(check_arguments(&cli, &config), Err(EXIT_BAD_ARGS));
    }
    assert_eq!(EXIT_BAD_ARGS, -1);
}

#[test]
fn late_surrogate_start_bridges_with_one_hydro_step() {
    let surrogate = SurrogateConfig {
        start_hours: 10.0,
        ..SurrogateConfig::default()
    };
    let mut scheduler = scheduler(
        CouplingMode::DrivenByDriving,
        SerialReducer,
        hydro_config(6.0),
        surrogate,
        4,
    );

    scheduler.step_iteration().unwrap();
    let clocks = scheduler.context().unwrap().clocks;
    assert_eq!(clocks.driving_clock, 16.0 * HOUR);
    assert_eq!(clocks.driven_clock, 6.0 * HOUR);

    // The hydro model never reads past the last exchanged time
    while scheduler.step_iteration().unwrap() != SchedulerState::BothFinished {
        let ctx = scheduler.context().unwrap();
        if !ctx.exchange.is_idle() {
            assert!(ctx.clocks.driven_clock <= ctx.exchange.record().curr_time() + 1.0e-3);
        }
    }
    assert_eq!(scheduler.hydro().clock(), RUN_END);
}

#[test]
fn zero_hydro_step_is_rejected_before_running() {
    let mut config = CouplerConfig::default();
    config.hydro.dt_seconds = 0.0;
    assert!(matches!(
        config.settings(1),
        Err(CouplingError::InvalidSetting { name: "hydro dt_seconds", .. })
    ));

    // Adapters built around the bad value fail at initialisation instead of hanging
    let mut scheduler = scheduler(
        CouplingMode::DrivenByDriving,
        SerialReducer,
        config.hydro.clone(),
        SurrogateConfig::default(),
        4,
    );
    assert!(matches!(
        scheduler.run(),
        Err(CouplingError::InvalidSetting { .. })
    ));
}

#[test]
fn surrogate_is_idle_off_root() {
    let summaries = ranked_run(CouplingMode::DrivenByDriving, 2, 4);
    // The surrogate ran once per iteration on rank 0 only, yet every rank
    // saw the same reduced driving clock
    assert!(summaries
        .iter()
        .all(|s| s.final_driving_clock == RUN_END && s.driving_invocations == 24));
    let off_root = HydrographSurrogate::new(SurrogateConfig::default(), 1);
    assert!(!off_root.runs_on_all_ranks());
    assert_eq!(off_root.clock(), 0.0);
}
