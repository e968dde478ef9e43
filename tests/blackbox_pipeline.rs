use perfmon_sampler::counter::decode::{decode, DecodeError};
use perfmon_sampler::counter::{check_capability, CounterCatalog, CounterId, CounterType};
use perfmon_sampler::driver::sim::{NullFrame, SimDriver};
use perfmon_sampler::driver::{
    PerfMonitorDriver, GL_PERCENTAGE_AMD, GL_UNSIGNED_INT, GL_UNSIGNED_INT64_AMD,
    PERFORMANCE_MONITOR_EXTENSION,
};
use perfmon_sampler::config::SamplingConfig;
use perfmon_sampler::monitor::PoolCounts;
use perfmon_sampler::pipeline::{Mode, Outcome};
use perfmon_sampler::report::Report;
use perfmon_sampler::sampler::{Sampler, SamplerOptions};
use tokio_util::sync::CancellationToken;

type SimSampler = Sampler<SimDriver, NullFrame, Vec<u8>>;

/// Discover, resolve `target_name` and build a sampler, returning the
/// discovery output alongside it.
fn pipeline(driver: SimDriver, target_name: &str, pool_size: usize) -> (SimSampler, String) {
    assert!(check_capability(&driver.extensions()));

    let mut discovery = Report::new(Vec::new());
    let catalog = CounterCatalog::discover(&driver, &mut discovery).expect("discover");
    let target = catalog.select_target(target_name);

    let sampler = Sampler::new(
        driver,
        NullFrame::new(),
        target,
        pool_size,
        Report::new(Vec::new()),
        SamplerOptions::default(),
    )
    .expect("sampler");

    let listing = String::from_utf8(discovery.into_inner()).expect("utf8");
    (sampler, listing)
}

fn report_lines(sampler: &SimSampler) -> Vec<String> {
    String::from_utf8(sampler.report().get_ref().clone())
        .expect("utf8")
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn hundred_frames_fill_pool_then_one_harvest_drains_it() {
    let (mut sampler, _) = pipeline(SimDriver::with_default_catalog(), "GRBM_000", 100);

    for frame in 0..100 {
        assert_eq!(sampler.step().expect("step"), None, "frame {frame}");
    }
    assert_eq!(
        sampler.pool().counts(),
        PoolCounts {
            free: 0,
            active: 0,
            pending: 100
        }
    );
    let pending = sampler.pool().pending_monitors();
    assert_eq!(pending.len(), 100);
    for monitor in pending {
        // GRBM_000 is group 0, counter 0 in the default catalog.
        assert_eq!(
            sampler.driver().selection(monitor),
            Some((0, &[0u32][..])),
            "monitor {monitor}"
        );
    }
    assert!(report_lines(&sampler).is_empty());
    assert_eq!(sampler.driver().finish_calls(), 0);

    let harvest = sampler
        .step()
        .expect("step")
        .expect("101st step harvests");
    assert_eq!(harvest.harvested, 100);
    assert_eq!(harvest.samples, 100);
    assert_eq!(sampler.driver().finish_calls(), 1);

    let lines = report_lines(&sampler);
    assert_eq!(lines.len(), 100);
    assert!(lines.iter().all(|l| l.starts_with("clocks: ")));

    // 100 released, one re-acquired by the 101st frame.
    assert_eq!(
        sampler.pool().counts(),
        PoolCounts {
            free: 99,
            active: 0,
            pending: 1
        }
    );
}

#[test]
fn discovery_lists_every_counter_with_type_names() {
    let driver = SimDriver::new()
        .with_extension(PERFORMANCE_MONITOR_EXTENSION)
        .with_group(3, "GRBM", &[(0, "GRBM_000", GL_UNSIGNED_INT64_AMD)])
        .with_group(
            7,
            "Misc",
            &[(2, "BUSY", GL_PERCENTAGE_AMD), (5, "ODD", 0x1234)],
        );

    let (_, listing) = pipeline(driver, "GRBM_000", 1);
    assert_eq!(
        listing,
        "group:GRBM(3)\tcounter:GRBM_000(0)\ttype:(GL_UNSIGNED_INT64_AMD)\n\
         group:Misc(7)\tcounter:BUSY(2)\ttype:(GL_PERCENTAGE_AMD)\n\
         group:Misc(7)\tcounter:ODD(5)\ttype:()\n"
    );
}

#[test]
fn duplicate_target_name_resolves_to_last_enumerated() {
    let driver = SimDriver::new()
        .with_extension(PERFORMANCE_MONITOR_EXTENSION)
        .with_group(0, "GRBM", &[(0, "GRBM_000", GL_UNSIGNED_INT64_AMD)])
        .with_group(4, "GRBM_SE", &[(9, "GRBM_000", GL_UNSIGNED_INT)]);

    let (mut sampler, _) = pipeline(driver, "GRBM_000", 2);
    let target = sampler.pool().target();
    assert_eq!(target.id, CounterId::new(4, 9));
    assert_eq!(target.declared_type, CounterType::UnsignedInt);
    assert_eq!(target.matches, 2);

    sampler.step().expect("step");
    sampler.harvest().expect("harvest");
    // GL_UNSIGNED_INT counters report the bracket sequence number.
    assert_eq!(report_lines(&sampler), vec!["clocks: 1".to_string()]);
}

#[test]
fn missing_extension_fails_capability_check() {
    let driver = SimDriver::new().with_group(0, "GRBM", &[(0, "GRBM_000", GL_UNSIGNED_INT64_AMD)]);
    assert!(!check_capability(&driver.extensions()));

    let other = SimDriver::new().with_extension("GL_ARB_timer_query");
    assert!(!check_capability(&other.extensions()));
}

#[test]
fn missing_extension_reports_unsupported_platform() {
    let mut driver =
        SimDriver::new().with_group(0, "GRBM", &[(0, "GRBM_000", GL_UNSIGNED_INT64_AMD)]);
    let mut out = Vec::new();

    let outcome = perfmon_sampler::pipeline::run(
        &mut driver,
        NullFrame::new(),
        Report::new(&mut out),
        &SamplingConfig {
            max_frames: Some(10),
            ..Default::default()
        },
        Mode::Sample,
        None,
        &CancellationToken::new(),
    )
    .expect("run");

    assert_eq!(outcome, Outcome::Unsupported);
    assert!(!outcome.is_success());
    assert_eq!(String::from_utf8(out).expect("utf8"), "ERROR: unsupported platform\n");
    assert_eq!(driver.live_monitors(), 0);
    assert_eq!(driver.finish_calls(), 0);
}

#[test]
fn empty_results_warn_without_breaking_pool() {
    let (mut sampler, _) = pipeline(
        SimDriver::with_default_catalog().with_empty_results(),
        "GRBM_000",
        10,
    );

    for _ in 0..25 {
        sampler.step().expect("step");
        assert_eq!(sampler.pool().counts().total(), 10);
    }
    let totals = sampler.totals();
    assert_eq!(totals.harvests, 2);
    assert_eq!(totals.no_data, 20);
    assert_eq!(totals.samples, 0);

    let lines = report_lines(&sampler);
    assert_eq!(lines.len(), 20);
    assert!(lines.iter().all(|l| l == "WARN: no data from counter"));
}

#[test]
fn unresolved_target_binds_default_slot() {
    let (mut sampler, _) = pipeline(SimDriver::with_default_catalog(), "NOPE", 3);
    let target = *sampler.pool().target();
    assert!(!target.is_resolved());
    assert_eq!(target.id, CounterId::UNSET);

    assert_eq!(target.declared_type, CounterType::UnsignedInt64);

    // Monitors are bound to (0, 0) regardless.
    sampler.step().expect("step");
    let monitor = sampler.pool().pending_monitors()[0];
    assert_eq!(sampler.driver().selection(monitor), Some((0, &[0u32][..])));

    // (0, 0) is a real counter here, so its values are printed.
    let harvest = sampler.harvest().expect("harvest");
    assert_eq!(harvest.samples, 1);
    assert_eq!(harvest.decode_errors, 0);
    assert_eq!(
        report_lines(&sampler),
        vec![format!("clocks: {}", SimDriver::simulated_clocks(1))]
    );
}

#[test]
fn run_until_frame_limit_harvests_everything() {
    let opts = SamplerOptions {
        max_frames: Some(250),
        idle_frames: false,
        ..Default::default()
    };

    let driver = SimDriver::with_default_catalog();
    let catalog =
        CounterCatalog::discover(&driver, &mut Report::new(std::io::sink())).expect("discover");
    let mut sampler = Sampler::new(
        driver,
        NullFrame::new(),
        catalog.select_target("GRBM_000"),
        100,
        Report::new(Vec::new()),
        opts,
    )
    .expect("sampler");

    let summary = sampler.run(&CancellationToken::new()).expect("run");
    assert_eq!(summary.frames, 250);
    assert_eq!(summary.samples, 250);
    assert_eq!(summary.harvests, 3);
    assert_eq!(sampler.frame().presents(), 250);
    assert_eq!(sampler.pool().counts().free, 100);

    let (driver, _, report) = sampler.shutdown();
    assert_eq!(driver.live_monitors(), 0);
    let out = String::from_utf8(report.into_inner()).expect("utf8");
    assert_eq!(out.lines().count(), 250);
}

#[test]
fn decoded_values_match_raw_layout() {
    let mut raw = Vec::new();
    raw.extend_from_slice(&6u32.to_ne_bytes());
    raw.extend_from_slice(&11u32.to_ne_bytes());
    raw.extend_from_slice(&0xDEAD_BEEF_0000_0042u64.to_ne_bytes());

    let sample = decode(&raw, CounterType::UnsignedInt64).expect("decode");
    assert_eq!(sample.id, CounterId::new(6, 11));
    assert_eq!(sample.value.to_string(), 0xDEAD_BEEF_0000_0042u64.to_string());

    assert_eq!(decode(&[], CounterType::UnsignedInt64), Err(DecodeError::NoData));
}
