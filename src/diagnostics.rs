use serde::{Deserialize, Serialize};

/// Between/within variance ratios above this are flagged as non-converged.
pub const RHAT_FLAG_THRESHOLD: f64 = 1.01;
/// Runs with more than this fraction of divergent transitions are unusable.
pub const DIVERGENCE_FRACTION_LIMIT: f64 = 0.05;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDiagnostics {
    pub name: String,
    pub rhat: f64,
    pub ess: f64,
}

/// Per-run convergence report. Generated by the estimator, consumed by the
/// acceptance gate; always attached to the coefficients it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub params: Vec<ParamDiagnostics>,
    pub worst_rhat: f64,
    pub min_ess: f64,
    pub divergences: usize,
    pub divergence_fraction: f64,
    pub depth_exhaustions: usize,
    pub depth_exhaustion_fraction: f64,
    pub chains_requested: usize,
    pub chains_completed: usize,
    pub total_draws: usize,
    /// Set when a chain timed out or was cut short; completed chains are
    /// still summarized.
    pub incomplete: bool,
    pub wall_clock_secs: f64,
}

impl DiagnosticsReport {
    pub fn flagged_params(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.rhat > RHAT_FLAG_THRESHOLD)
            .count()
    }

    /// Convergence gate used by callers before trusting coefficients.
    pub fn converged(&self) -> bool {
        !self.incomplete
            && self.chains_completed == self.chains_requested
            && self.worst_rhat <= RHAT_FLAG_THRESHOLD
            && self.divergence_fraction <= DIVERGENCE_FRACTION_LIMIT
    }
}

/// Split R-hat: each chain is halved, then the classic between/within ratio
/// is computed over the half-chains. Pure function of the draws.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let mut halves: Vec<&[f64]> = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let n = chain.len();
        if n < 4 {
            return f64::NAN;
        }
        let mid = n / 2;
        halves.push(&chain[..mid]);
        halves.push(&chain[n - mid..]);
    }

    let m = halves.len() as f64;
    let n = halves.iter().map(|h| h.len()).min().unwrap_or(0) as f64;
    if n < 2.0 {
        return f64::NAN;
    }

    let means: Vec<f64> = halves.iter().map(|h| mean(h)).collect();
    let grand = mean(&means);
    let b = n / (m - 1.0)
        * means
            .iter()
            .map(|mu| (mu - grand) * (mu - grand))
            .sum::<f64>();
    let w = halves
        .iter()
        .map(|h| sample_variance(h))
        .sum::<f64>()
        / m;

    if w <= 1e-300 {
        // Constant chains: converged by definition.
        return 1.0;
    }
    let var_hat = (n - 1.0) / n * w + b / n;
    (var_hat / w).sqrt()
}

/// Effective sample size across chains via Geyer's initial-positive-sequence
/// truncation of the pooled autocorrelation.
pub fn effective_sample_size(chains: &[Vec<f64>]) -> f64 {
    let m = chains.len();
    let n = chains.iter().map(|c| c.len()).min().unwrap_or(0);
    if m == 0 || n < 4 {
        return f64::NAN;
    }
    let total = (m * n) as f64;

    let chain_means: Vec<f64> = chains.iter().map(|c| mean(&c[..n])).collect();
    let chain_vars: Vec<f64> = chains.iter().map(|c| sample_variance(&c[..n])).collect();
    let w = mean(&chain_vars);
    let grand = mean(&chain_means);
    let b_over_n = if m > 1 {
        chain_means
            .iter()
            .map(|mu| (mu - grand) * (mu - grand))
            .sum::<f64>()
            / (m as f64 - 1.0)
    } else {
        0.0
    };
    let var_plus = w * (n as f64 - 1.0) / n as f64 + b_over_n;
    if var_plus <= 1e-300 {
        return total;
    }

    // Pooled autocovariance at each lag, averaged over chains.
    let max_lag = (n - 1).min(n / 2 + 1);
    let autocov = |lag: usize| -> f64 {
        let mut acc = 0.0;
        for (chain, mu) in chains.iter().zip(&chain_means) {
            let mut s = 0.0;
            for t in 0..(n - lag) {
                s += (chain[t] - mu) * (chain[t + lag] - mu);
            }
            acc += s / n as f64;
        }
        acc / m as f64
    };

    let mut rho_sum = 0.0;
    let mut lag = 1usize;
    while lag + 1 < max_lag {
        let rho_a = 1.0 - (w - autocov(lag)) / var_plus;
        let rho_b = 1.0 - (w - autocov(lag + 1)) / var_plus;
        if rho_a + rho_b < 0.0 {
            break;
        }
        rho_sum += rho_a + rho_b;
        lag += 2;
    }

    (total / (1.0 + 2.0 * rho_sum)).clamp(1.0, total)
}

/// Summarize per-parameter chains into a report. `chains[c]` is the draw
/// matrix of chain `c`: one Vec per retained draw, parameter-major access is
/// done here. Deterministic, no side effects.
#[allow(clippy::too_many_arguments)]
pub fn summarize_run(
    chains: &[Vec<Vec<f64>>],
    param_names: &[String],
    divergences: usize,
    depth_exhaustions: usize,
    chains_requested: usize,
    incomplete: bool,
    wall_clock_secs: f64,
) -> DiagnosticsReport {
    let total_draws: usize = chains.iter().map(|c| c.len()).sum();
    let mut params = Vec::with_capacity(param_names.len());
    let mut worst_rhat: f64 = 0.0;
    let mut min_ess = f64::INFINITY;

    for (idx, name) in param_names.iter().enumerate() {
        let per_chain: Vec<Vec<f64>> = chains
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| c.iter().map(|draw| draw[idx]).collect())
            .collect();
        let rhat = split_rhat(&per_chain);
        let ess = effective_sample_size(&per_chain);
        if rhat.is_finite() {
            worst_rhat = worst_rhat.max(rhat);
        }
        if ess.is_finite() {
            min_ess = min_ess.min(ess);
        }
        params.push(ParamDiagnostics {
            name: name.clone(),
            rhat,
            ess,
        });
    }

    let frac = |count: usize| {
        if total_draws == 0 {
            0.0
        } else {
            count as f64 / total_draws as f64
        }
    };

    DiagnosticsReport {
        params,
        worst_rhat,
        min_ess: if min_ess.is_finite() { min_ess } else { 0.0 },
        divergences,
        divergence_fraction: frac(divergences),
        depth_exhaustions,
        depth_exhaustion_fraction: frac(depth_exhaustions),
        chains_requested,
        chains_completed: chains.iter().filter(|c| !c.is_empty()).count(),
        total_draws,
        incomplete,
        wall_clock_secs,
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sample_variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let mu = mean(xs);
    xs.iter().map(|x| (x - mu) * (x - mu)).sum::<f64>() / (xs.len() as f64 - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn gaussian_chain(seed: u64, shift: f64, n: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let z: f64 = rng.sample(StandardNormal);
                shift + z
            })
            .collect()
    }

    #[test]
    fn well_mixed_chains_pass_the_rhat_flag() {
        let chains = vec![
            gaussian_chain(1, 0.0, 800),
            gaussian_chain(2, 0.0, 800),
            gaussian_chain(3, 0.0, 800),
        ];
        let rhat = split_rhat(&chains);
        assert!(rhat.is_finite());
        assert!(rhat < RHAT_FLAG_THRESHOLD + 0.005, "rhat = {rhat}");
    }

    #[test]
    fn shifted_chains_are_flagged() {
        let chains = vec![gaussian_chain(1, 0.0, 800), gaussian_chain(2, 1.5, 800)];
        let rhat = split_rhat(&chains);
        assert!(rhat > RHAT_FLAG_THRESHOLD, "rhat = {rhat}");
    }

    #[test]
    fn ess_of_independent_draws_is_near_the_draw_count() {
        let chains = vec![gaussian_chain(5, 0.0, 600), gaussian_chain(6, 0.0, 600)];
        let ess = effective_sample_size(&chains);
        assert!(ess > 600.0, "ess = {ess}");
        assert!(ess <= 1200.0, "ess = {ess}");
    }

    #[test]
    fn ess_of_sticky_chains_is_small() {
        // Strong AR(1): each draw barely moves.
        let mut chains = Vec::new();
        for seed in [11u64, 12] {
            let noise = gaussian_chain(seed, 0.0, 600);
            let mut chain = vec![0.0f64];
            for t in 1..600 {
                let prev = chain[t - 1];
                chain.push(0.98 * prev + 0.02 * noise[t]);
            }
            chains.push(chain);
        }
        let ess = effective_sample_size(&chains);
        assert!(ess < 120.0, "ess = {ess}");
    }

    #[test]
    fn summarize_collects_worst_case_and_fractions() {
        let chains = vec![
            vec![vec![0.0, 1.0], vec![0.1, 1.1], vec![-0.1, 0.9], vec![0.0, 1.0], vec![0.05, 1.05], vec![-0.05, 0.95], vec![0.0, 1.0], vec![0.1, 1.1]],
            vec![vec![0.0, 1.0], vec![-0.1, 0.9], vec![0.1, 1.1], vec![0.0, 1.0], vec![-0.05, 0.95], vec![0.05, 1.05], vec![0.0, 1.0], vec![-0.1, 0.9]],
        ];
        let names = vec!["alpha".to_string(), "beta".to_string()];
        let report = summarize_run(&chains, &names, 2, 1, 2, false, 0.5);
        assert_eq!(report.params.len(), 2);
        assert_eq!(report.total_draws, 16);
        assert_eq!(report.divergences, 2);
        assert!((report.divergence_fraction - 0.125).abs() < 1e-12);
        assert_eq!(report.chains_completed, 2);
        assert!(!report.incomplete);
    }
}
