use nltha_core::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn record() -> Record {
    // Two seconds of a decaying 2 Hz pulse train, dt = 0.01
    let accel: Vec<f64> = (0..200)
        .map(|i| {
            let t = i as f64 * 0.01;
            0.3 * (-t).exp() * (2.0 * std::f64::consts::PI * 2.0 * t).sin()
        })
        .collect();
    Record::new("GM_pulse", 0.01, vec![accel]).unwrap()
}

fn scale_factor_ida(max_runs: usize) -> IdaAnalysis {
    AnalysisOptions::ida(vec![1.0])
        .with_max_runs(max_runs)
        .with_time_step(0.01)
        .with_drift_capacity(10.0)
        .with_intensity_basis(IntensityBasis::ScaleFactor)
        .plan()
        .unwrap()
        .ida_analysis()
        .unwrap()
}

fn levels_in(capacity: &RecordCapacity, phase: Phase) -> Vec<f64> {
    capacity
        .runs
        .iter()
        .filter(|run| run.phase == Some(phase))
        .map(|run| run.level)
        .collect()
}

#[test]
fn test_threshold_scenario() {
    init_logging();
    let ida = scale_factor_ida(10);
    let mut driver = ThresholdDriver::new(0.5, DriftModel::Constant(2.0));
    let capacity = ida.trace(&record(), &mut driver).unwrap();

    assert!(capacity.runs.len() <= 10);
    assert_eq!(driver.calls.len(), capacity.runs.len());
    assert_eq!(driver.wipes, capacity.runs.len());

    let hunt = levels_in(&capacity, Phase::Hunting);
    assert!(hunt.windows(2).all(|w| w[1] > w[0]));
    let last_hunt = capacity.runs.iter().filter(|r| r.phase == Some(Phase::Hunting)).last().unwrap();
    assert_eq!(last_hunt.status, RunStatus::NonConvergence);
    assert!(capacity.runs[..hunt.len() - 1].iter().all(|r| r.status == RunStatus::Survived));

    let survived_max = hunt[hunt.len() - 2];
    let first_collapse = hunt[hunt.len() - 1];
    assert!(survived_max <= 0.5 && first_collapse > 0.5);
    for level in levels_in(&capacity, Phase::Bisecting) {
        assert!(level > survived_max && level < first_collapse);
    }

    let point = capacity.capacity.unwrap();
    assert!(point.scale > 0.5 && point.scale <= 0.55, "capacity scale {}", point.scale);
    assert!(point.scale - 0.5 < 0.01);
    assert!(capacity.is_complete());
}

#[test]
fn test_bisection_width_decreases() {
    let ida = scale_factor_ida(30);
    for threshold in [0.03, 0.12, 0.37, 0.5, 0.81, 1.9] {
        let mut driver = ThresholdDriver::new(threshold, DriftModel::Proportional(4.0));
        let capacity = ida.trace(&record(), &mut driver).unwrap();

        let hunt = levels_in(&capacity, Phase::Hunting);
        let mut upper = *hunt.last().unwrap();
        let mut lower = if hunt.len() > 1 { hunt[hunt.len() - 2] } else { 0.0 };
        let mut width = upper - lower;

        for run in capacity.runs.iter().filter(|r| r.phase == Some(Phase::Bisecting)) {
            assert!(run.level > lower && run.level < upper);
            if run.is_collapse() {
                upper = run.level;
            } else {
                lower = run.level;
            }
            assert!(upper - lower < width);
            width = upper - lower;
        }
        assert!(capacity.runs.len() <= 30);
        let point = capacity.capacity.unwrap();
        assert!(point.scale > threshold && point.scale - threshold < 0.01);
    }
}

#[test]
fn test_no_collapse_is_incomplete_not_error() {
    let ida = scale_factor_ida(6);
    let mut driver = ThresholdDriver::new(f64::INFINITY, DriftModel::Proportional(1.0));
    let capacity = ida.trace(&record(), &mut driver).unwrap();

    assert_eq!(capacity.runs.len(), 6);
    assert_eq!(capacity.termination, Termination::CapacityNotFound);
    assert!(!capacity.is_complete());
    assert!(capacity.capacity.is_none());
}

#[test]
fn test_drift_capacity_exceedance_counts_as_collapse() {
    let ida = scale_factor_ida(12);
    // 20% drift per unit scale reaches the 10% capacity at a scale of 0.5
    let mut driver = ThresholdDriver::new(f64::INFINITY, DriftModel::Proportional(20.0));
    let capacity = ida.trace(&record(), &mut driver).unwrap();

    let point = capacity.capacity.unwrap();
    assert_eq!(capacity.runs[point.run_index].status, RunStatus::Collapsed);
    assert!(point.scale >= 0.5);
}

#[test]
fn test_trace_is_idempotent() {
    let ida = scale_factor_ida(12);
    let first = ida
        .trace(&record(), &mut ThresholdDriver::new(0.42, DriftModel::Proportional(5.0)))
        .unwrap();
    let second = ida
        .trace(&record(), &mut ThresholdDriver::new(0.42, DriftModel::Proportional(5.0)))
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_spectral_basis_scales_to_target_im() {
    let ida = AnalysisOptions::ida(vec![0.5])
        .with_max_runs(8)
        .plan()
        .unwrap()
        .ida_analysis()
        .unwrap();
    let mut driver = ThresholdDriver::new(f64::INFINITY, DriftModel::Proportional(1.0));
    let capacity = ida.trace(&record(), &mut driver).unwrap();

    for run in &capacity.runs {
        assert!((run.im - run.level).abs() < 1e-9 * run.level.max(1.0));
    }
}

#[test]
fn test_missing_periods_is_configuration_error() {
    let options = AnalysisOptions {
        analysis_type: vec!["IDA".to_string()],
        periods_ida: None,
        ..AnalysisOptions::default()
    };
    match options.plan() {
        Err(NlthaError::Configuration { parameter, .. }) => assert_eq!(parameter, "periods_ida"),
        other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_summary_skips_short_records() {
    init_logging();
    let ida = scale_factor_ida(10);
    let mut capacities = Vec::new();
    for threshold in [0.4, 0.6, 0.9] {
        let mut driver = ThresholdDriver::new(threshold, DriftModel::Proportional(8.0));
        capacities.push(ida.trace(&record(), &mut driver).unwrap());
    }
    for (capacity, name) in capacities.iter_mut().zip(["GM1", "GM2", "GM3"]) {
        capacity.record = name.to_string();
    }

    // Collapses on the first run: a single run, no curve
    let mut driver = ThresholdDriver::new(0.01, DriftModel::Proportional(8.0));
    let short = scale_factor_ida(1).trace(&record(), &mut driver).unwrap();
    assert_eq!(short.runs.len(), 1);
    capacities.push(RecordCapacity { record: "GM_short".into(), ..short });

    let summary = CapacitySummary::build(&capacities, &AggregationSettings::default());

    assert_eq!(summary.curves.len(), 3);
    assert_eq!(summary.skipped, vec!["GM_short".to_string()]);
    assert_eq!(summary.grid.len(), 200);
    assert_eq!(summary.quantiles.p50.len(), summary.grid.len());
    for g in 1..summary.grid.len() {
        let (p16, p50, p84) = (
            summary.quantiles.p16[g],
            summary.quantiles.p50[g],
            summary.quantiles.p84[g],
        );
        assert!(p16 <= p50 && p50 <= p84);
    }
}
