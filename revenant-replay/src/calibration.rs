use std::time::{Duration, Instant};

use chrono::Utc;
use log::{info, warn};
use revenant_proc::{DifferentiatedRecord, Differentiator, SysfsNicCapability};
use revenant_proto::SeriesKey;
use serde::{Deserialize, Serialize};

use crate::error::ReplayError;
use crate::work::Workload;

const MAX_DECILE_ATTEMPTS: u32 = 10;
const ACCEPTABLE_BAND_PP: f64 = 2.0;
const STABILITY_TOLERANCE: f64 = 0.05;

/// Maps a target busy percentage (0..=100) to the number of canonical
/// work units that produce it on this host, for `cores` virtual cores
/// running for one measurement interval.
///
/// `units[p]` is trained as a total unit count across all cores for
/// one `training_interval`-long tick. Replay's own
/// measurement interval (its `frequency`) need not match the interval
/// training used, so [`Self::units_for_tick`] re-scales the trained
/// total by `frequency / training_interval` rather than assuming the
/// two always agree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    units: [u64; 101],
    training_interval: Duration,
}

impl CalibrationTable {
    /// Builds a table from already-computed deciles, for tests and for
    /// loading a previously trained table back from disk.
    pub fn from_parts(units: [u64; 101], training_interval: Duration) -> Self {
        Self { units, training_interval }
    }

    pub fn units(&self) -> &[u64; 101] {
        &self.units
    }

    /// Total (across-all-cores) unit count to run for one tick of
    /// length `frequency`, for a scaled busy target.
    pub fn units_for_tick(&self, busy_percent: f64, scale: f64, frequency: Duration) -> u64 {
        let p = (busy_percent * scale).round().clamp(0.0, 100.0) as usize;
        let per_second = self.units[p] as f64 / self.training_interval.as_secs_f64().max(f64::MIN_POSITIVE);
        (per_second * frequency.as_secs_f64()).round() as u64
    }

    /// Runs the full training procedure: measures
    /// units/sec via a rough and a fine pass, then searches each
    /// decile anchor by running the workload on `cores` threads for
    /// one `interval` and comparing the observed `/proc/stat` busy
    /// percentage against the target.
    pub fn train(cores: usize, interval: Duration, fine_duration: Duration) -> Result<Self, ReplayError> {
        let units_per_second = measure_units_per_second(interval, fine_duration)?;
        info!("trained units/sec/core = {units_per_second:.1} ({cores} core(s), interval {interval:?})");

        let mut units = [0u64; 101];
        units[100] = (units_per_second * interval.as_secs_f64()).round() as u64 * cores as u64;

        for decile in (10..=90).step_by(10) {
            units[decile as usize] = calibrate_decile(decile as f64, units_per_second, interval, cores)?;
        }

        interpolate(&mut units);
        Ok(Self { units, training_interval: interval })
    }
}

/// Runs a 1s rough pass and a `fine_duration` fine pass; accepts only
/// if they agree within 5% on both units/sec and average per-unit wall
/// time. Returns the fine pass's rate, since it ran
/// longer and is the more precise estimate.
fn measure_units_per_second(interval: Duration, fine_duration: Duration) -> Result<f64, ReplayError> {
    let _ = interval; // kept for symmetry with calibrate_decile's signature; unused here.
    let (rough_units, rough_elapsed) = run_for(Duration::from_secs(1));
    let (fine_units, fine_elapsed) = run_for(fine_duration);

    let rough_rate = rough_units as f64 / rough_elapsed.as_secs_f64();
    let fine_rate = fine_units as f64 / fine_elapsed.as_secs_f64();
    let rough_per_unit = rough_elapsed.as_secs_f64() / rough_units.max(1) as f64;
    let fine_per_unit = fine_elapsed.as_secs_f64() / fine_units.max(1) as f64;

    if !agrees_within(rough_rate, fine_rate, STABILITY_TOLERANCE) || !agrees_within(rough_per_unit, fine_per_unit, STABILITY_TOLERANCE) {
        warn!("training unstable: rough {rough_rate:.1} units/s vs fine {fine_rate:.1} units/s");
        return Err(ReplayError::UnstableMeasurement { rough_rate, fine_rate });
    }

    Ok(fine_rate)
}

fn run_for(duration: Duration) -> (u64, Duration) {
    let mut workload = Workload::new();
    let start = Instant::now();
    let mut units = 0u64;
    while start.elapsed() < duration {
        workload.run_units(1);
        units += 1;
    }
    (units.max(1), start.elapsed())
}

fn agrees_within(a: f64, b: f64, tolerance: f64) -> bool {
    let denom = a.max(b).max(f64::MIN_POSITIVE);
    (a - b).abs() / denom <= tolerance
}

/// Searches for the per-core unit count that produces `target_busy`
/// percent busy when run across `cores` for one `interval`. Starts
/// from the linear guess `load = p * U * interval` and nudges by one
/// unit per retry, up to ten attempts.
fn calibrate_decile(target_busy: f64, units_per_second: f64, interval: Duration, cores: usize) -> Result<u64, ReplayError> {
    let mut load = (target_busy / 100.0 * units_per_second * interval.as_secs_f64()).round().max(0.0) as i64;

    for attempt in 0..MAX_DECILE_ATTEMPTS {
        let observed = run_trial(load.max(0) as u64, cores)?;
        if (observed - target_busy).abs() <= ACCEPTABLE_BAND_PP {
            info!("decile {target_busy}% converged at load={load} after {} attempt(s) (observed {observed:.1}%)", attempt + 1);
            return Ok(load.max(0) as u64 * cores as u64);
        }
        if observed < target_busy {
            load += 1;
        } else {
            load -= 1;
        }
    }

    Err(ReplayError::DecileDidNotConverge(target_busy as u32))
}

/// Runs `units_per_core` units on each of `cores` threads, reading
/// `/proc/stat` immediately before and after, and returns the observed
/// aggregate busy percentage.
fn run_trial(units_per_core: u64, cores: usize) -> Result<f64, ReplayError> {
    let before = std::fs::read_to_string("/proc/stat")?;
    let t0 = Utc::now();

    std::thread::scope(|scope| {
        for _ in 0..cores.max(1) {
            scope.spawn(|| {
                let mut workload = Workload::new();
                workload.run_units(units_per_core);
            });
        }
    });

    let after = std::fs::read_to_string("/proc/stat")?;
    let t1 = Utc::now();

    let mut differentiator = Differentiator::new(SysfsNicCapability);
    let key = SeriesKey::new(0, 0, 0, "/proc/stat");
    differentiator.advance(key.clone(), "/proc/stat", &before, t0)?;
    let record = differentiator
        .advance(key, "/proc/stat", &after, t1)?
        .expect("second /proc/stat read always differentiates against the first");

    let DifferentiatedRecord::Stat(records) = record else {
        unreachable!("/proc/stat always classifies to the Stat family")
    };
    let aggregate = records.iter().find(|r| r.cpu_id == -1).expect("parse_stat guarantees an aggregate line");
    Ok(100.0 - aggregate.idle)
}

/// Fills in the 89 non-decile indices by linear interpolation between
/// the nearest anchors below and above; truncates
/// rather than rounds so replay never spends more units than the
/// calibration curve implies.
fn interpolate(units: &mut [u64; 101]) {
    let anchors: Vec<usize> = (0..=100).step_by(10).collect();
    for window in anchors.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        let lo_val = units[lo] as f64;
        let hi_val = units[hi] as f64;
        for p in (lo + 1)..hi {
            let frac = (p - lo) as f64 / (hi - lo) as f64;
            units[p] = (lo_val + (hi_val - lo_val) * frac) as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_is_monotonic_between_anchors() {
        let mut units = [0u64; 101];
        units[0] = 0;
        units[10] = 100;
        units[20] = 300;
        for p in 0..=20 {
            units[p] = units[p];
        }
        interpolate(&mut units);
        assert_eq!(units[5], 50);
        assert_eq!(units[15], 200);
    }

    #[test]
    fn agrees_within_tolerance_accepts_close_rates() {
        assert!(agrees_within(1000.0, 1030.0, 0.05));
        assert!(!agrees_within(1000.0, 1200.0, 0.05));
    }

    #[test]
    fn units_for_tick_clamps_a_scaled_target_and_rescales_by_frequency() {
        let mut units = [0u64; 101];
        units[100] = 1000;
        let table = CalibrationTable { units, training_interval: Duration::from_secs(1) };
        // 60 * 2.0 = 120 clamps to 100; a tick as long as the training
        // interval reproduces the trained total unchanged.
        assert_eq!(table.units_for_tick(60.0, 2.0, Duration::from_secs(1)), 1000);
        assert_eq!(table.units_for_tick(0.0, 1.0, Duration::from_secs(1)), 0);
        // A tick half as long as training spends half the units.
        assert_eq!(table.units_for_tick(100.0, 1.0, Duration::from_millis(500)), 500);
    }
}
