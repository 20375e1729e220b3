//! Batched-service throughput model.
//!
//! Throughput at pipeline depth `p` is modelled as `T(p) = p / (t0 + t1·p)`:
//! every batch pays a fixed cost `t0` (readiness wakeup, one read and one
//! write) and every command a marginal cost `t1`. Rewriting it as
//! `p / T = t0 + t1·p` makes it linear in `p`, so both parameters come out
//! of an ordinary least-squares fit over measured `(p, T)` samples.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tolerance on R² when deciding whether the batched model is at least as
/// good as the linear alternative
pub const R_SQUARED_TOLERANCE: f64 = 0.01;

/// Two-sided 95% Student-t critical values for 1..=30 degrees of freedom
const T_CRITICAL_95: [f64; 30] = [
    12.706, 4.303, 3.182, 2.776, 2.571, 2.447, 2.365, 2.306, 2.262, 2.228, 2.201, 2.179, 2.160,
    2.145, 2.131, 2.120, 2.110, 2.101, 2.093, 2.086, 2.080, 2.074, 2.069, 2.064, 2.060, 2.056,
    2.052, 2.048, 2.045, 2.042,
];

/// One measurement at a fixed pipeline depth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    /// Pipeline depth `p`
    pub depth: u32,
    /// Aggregate throughput in operations per second
    pub ops_per_sec: f64,
    /// Median batch round-trip latency in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p50_latency_ms: Option<f64>,
    /// Server-side (reads + writes) / commands over the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syscalls_per_op: Option<f64>,
}

impl ThroughputSample {
    pub fn new(depth: u32, ops_per_sec: f64) -> Self {
        Self {
            depth,
            ops_per_sec,
            p50_latency_ms: None,
            syscalls_per_op: None,
        }
    }
}

/// Fitted parameters of `T(p) = p / (t0 + t1·p)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchedServiceFit {
    /// Fixed cost per batch, microseconds
    pub t0_us_per_batch: f64,
    /// Marginal cost per command, nanoseconds
    pub t1_ns_per_op: f64,
    /// Coefficient of determination of the linearized fit
    pub r_squared: f64,
    /// 95% interval for `t0` (needs three or more samples)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t0_confidence_interval: Option<(f64, f64)>,
    /// 95% interval for `t1` (needs three or more samples)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t1_confidence_interval: Option<(f64, f64)>,
    /// Saturation throughput `1 / t1`, ops/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_max_ops_per_sec: Option<f64>,
    /// Depth `t0 / t1` where per-batch and per-command costs are equal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knee_depth: Option<f64>,
    pub samples: usize,
}

impl BatchedServiceFit {
    /// Predicted throughput at depth `p`, ops/s
    pub fn predict(&self, p: f64) -> f64 {
        let t0 = self.t0_us_per_batch * 1e-6;
        let t1 = self.t1_ns_per_op * 1e-9;
        p / (t0 + t1 * p)
    }
}

/// `T = a + b·p`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub intercept: f64,
    pub slope: f64,
    pub r_squared: f64,
}

impl LinearFit {
    pub fn predict(&self, p: f64) -> f64 {
        self.intercept + self.slope * p
    }
}

/// Both models scored on the same throughput samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    pub batched: BatchedServiceFit,
    /// R² of the batched model measured on `T`, not on `p / T`
    pub batched_r_squared: f64,
    pub linear: LinearFit,
    /// Batched model is no worse than the linear one within tolerance
    pub batched_preferred: bool,
}

/// Little's-law check `T · p50 ≤ C · p` for one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureCheck {
    pub depth: u32,
    /// `T · p50`, requests in flight implied by the measurement
    pub in_flight: f64,
    /// `C · p`, requests the clients can have outstanding
    pub bound: f64,
    pub holds: bool,
}

struct Regression {
    intercept: f64,
    slope: f64,
    r_squared: f64,
    /// Standard errors of (intercept, slope) when n > 2
    std_errors: Option<(f64, f64)>,
    n: usize,
}

fn least_squares(x: &[f64], y: &[f64]) -> Result<Regression> {
    let n = x.len();
    if n < 2 || y.len() != n {
        return Err(Error::Analysis(format!(
            "need at least 2 samples, got {}",
            n
        )));
    }

    let nf = n as f64;
    let x_mean = x.iter().sum::<f64>() / nf;
    let y_mean = y.iter().sum::<f64>() / nf;
    let sxx: f64 = x.iter().map(|xi| (xi - x_mean).powi(2)).sum();
    if sxx == 0.0 {
        return Err(Error::Analysis(
            "need at least 2 distinct pipeline depths".into(),
        ));
    }
    let sxy: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (xi - x_mean) * (yi - y_mean))
        .sum();

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let ss_res: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (yi - (intercept + slope * xi)).powi(2))
        .sum();
    let ss_tot: f64 = y.iter().map(|yi| (yi - y_mean).powi(2)).sum();

    let std_errors = (n > 2).then(|| {
        let mse = ss_res / (nf - 2.0);
        let se_slope = (mse / sxx).sqrt();
        let se_intercept = (mse * (1.0 / nf + x_mean * x_mean / sxx)).sqrt();
        (se_intercept, se_slope)
    });

    Ok(Regression {
        intercept,
        slope,
        r_squared: r_squared(ss_res, ss_tot),
        std_errors,
        n,
    })
}

fn r_squared(ss_res: f64, ss_tot: f64) -> f64 {
    if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

fn check_samples(samples: &[ThroughputSample]) -> Result<()> {
    for s in samples {
        if s.depth == 0 {
            return Err(Error::Analysis("pipeline depth must be >= 1".into()));
        }
        if !(s.ops_per_sec.is_finite() && s.ops_per_sec > 0.0) {
            return Err(Error::Analysis(format!(
                "throughput at depth {} must be positive, got {}",
                s.depth, s.ops_per_sec
            )));
        }
    }
    Ok(())
}

/// Two-sided 95% Student-t critical value.
///
/// Degrees of freedom past the table use the next smaller tabulated row.
pub fn t_critical_95(df: usize) -> f64 {
    match df {
        0 => f64::NAN,
        1..=30 => T_CRITICAL_95[df - 1],
        31..=40 => 2.042,
        41..=60 => 2.021,
        61..=120 => 2.000,
        _ => 1.980,
    }
}

/// Fit `T(p) = p / (t0 + t1·p)` by least squares on `p / T = t0 + t1·p`
pub fn fit_batched_service(samples: &[ThroughputSample]) -> Result<BatchedServiceFit> {
    check_samples(samples)?;
    let x: Vec<f64> = samples.iter().map(|s| s.depth as f64).collect();
    let y: Vec<f64> = samples
        .iter()
        .map(|s| s.depth as f64 / s.ops_per_sec)
        .collect();
    let fit = least_squares(&x, &y)?;

    let (t0, t1) = (fit.intercept, fit.slope);
    let (t0_ci, t1_ci) = match fit.std_errors {
        Some((se_t0, se_t1)) => {
            let t = t_critical_95(fit.n - 2);
            (
                Some(((t0 - t * se_t0) * 1e6, (t0 + t * se_t0) * 1e6)),
                Some(((t1 - t * se_t1) * 1e9, (t1 + t * se_t1) * 1e9)),
            )
        }
        None => (None, None),
    };

    Ok(BatchedServiceFit {
        t0_us_per_batch: t0 * 1e6,
        t1_ns_per_op: t1 * 1e9,
        r_squared: fit.r_squared,
        t0_confidence_interval: t0_ci,
        t1_confidence_interval: t1_ci,
        t_max_ops_per_sec: (t1 > 0.0).then(|| 1.0 / t1),
        knee_depth: (t1 > 0.0).then(|| t0 / t1),
        samples: fit.n,
    })
}

/// Fit the linear alternative `T = a + b·p`
pub fn fit_linear(samples: &[ThroughputSample]) -> Result<LinearFit> {
    check_samples(samples)?;
    let x: Vec<f64> = samples.iter().map(|s| s.depth as f64).collect();
    let y: Vec<f64> = samples.iter().map(|s| s.ops_per_sec).collect();
    let fit = least_squares(&x, &y)?;
    Ok(LinearFit {
        intercept: fit.intercept,
        slope: fit.slope,
        r_squared: fit.r_squared,
    })
}

/// Score both models in throughput space
pub fn compare(samples: &[ThroughputSample]) -> Result<ModelComparison> {
    let batched = fit_batched_service(samples)?;
    let linear = fit_linear(samples)?;

    let mean = samples.iter().map(|s| s.ops_per_sec).sum::<f64>() / samples.len() as f64;
    let ss_tot: f64 = samples.iter().map(|s| (s.ops_per_sec - mean).powi(2)).sum();
    let ss_res: f64 = samples
        .iter()
        .map(|s| (s.ops_per_sec - batched.predict(s.depth as f64)).powi(2))
        .sum();
    let batched_r_squared = r_squared(ss_res, ss_tot);

    Ok(ModelComparison {
        batched_preferred: batched_r_squared >= linear.r_squared - R_SQUARED_TOLERANCE,
        batched,
        batched_r_squared,
        linear,
    })
}

/// Little's law: with `clients` connections each keeping at most `p`
/// requests outstanding, `T · p50` cannot exceed `C · p`.
///
/// Samples without a latency measurement are skipped.
pub fn check_pipeline_closure(samples: &[ThroughputSample], clients: usize) -> Vec<ClosureCheck> {
    samples
        .iter()
        .filter_map(|s| {
            let p50_secs = s.p50_latency_ms? / 1000.0;
            let in_flight = s.ops_per_sec * p50_secs;
            let bound = (clients as f64) * (s.depth as f64);
            Some(ClosureCheck {
                depth: s.depth,
                in_flight,
                bound,
                holds: in_flight <= bound,
            })
        })
        .collect()
}

/// One read and one write per batch of `p` commands
pub fn expected_syscalls_per_op(depth: u32) -> f64 {
    2.0 / depth.max(1) as f64
}
