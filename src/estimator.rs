use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::diagnostics::{self, DiagnosticsReport};
use crate::model::{
    CoefficientRow, CoefficientSet, ConstraintMode, ParameterizationKind,
};
use crate::rosters::ARCHETYPE_COUNT;
use crate::zmatrix::TrainingRow;

const K: usize = ARCHETYPE_COUNT;
const LN_2PI: f64 = 1.837_877_066_409_345_3;

// Weakly informative, zero-centered priors so the data dominates.
const INTERCEPT_PRIOR_SD: f64 = 5.0;
const SKILL_PRIOR_SD: f64 = 2.5;
const SIGMA_PRIOR_SD: f64 = 5.0;

// A leapfrog state whose energy error exceeds this is a divergent transition.
const DIVERGENCE_ENERGY_LIMIT: f64 = 1000.0;

// Dual-averaging constants (Hoffman & Gelman 2014).
const DA_GAMMA: f64 = 0.05;
const DA_T0: f64 = 10.0;
const DA_KAPPA: f64 = 0.75;

/// Estimation run configuration. Parameterization and constraint mode are
/// explicit; there is no fallback between them.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    pub kind: ParameterizationKind,
    pub constraint: ConstraintMode,
    pub chains: usize,
    pub warmup: usize,
    pub samples: usize,
    /// Adaptation aggressiveness: target acceptance statistic for step-size
    /// adaptation. Higher is more conservative.
    pub target_accept: f64,
    pub max_depth: usize,
    pub seed: u64,
    /// Wall-clock budget for the whole run. Hitting it is recoverable:
    /// completed chains are kept and the run is marked incomplete.
    pub timeout: Option<Duration>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        EstimatorConfig {
            kind: ParameterizationKind::Global,
            constraint: ConstraintMode::Constrained,
            chains: 4,
            warmup: 500,
            samples: 500,
            target_accept: 0.80,
            max_depth: 10,
            seed: 1,
            timeout: None,
        }
    }
}

/// Estimation output. Diagnostics always travel with the coefficients;
/// consuming a non-converged fit without checking them is a caller error the
/// API makes impossible to commit silently.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub coefficients: CoefficientSet,
    pub diagnostics: DiagnosticsReport,
    pub param_names: Vec<String>,
    /// Posterior means/sds on the constrained (interpretable) scale.
    pub posterior_mean: Vec<f64>,
    pub posterior_sd: Vec<f64>,
    /// Observed matchup ids in block order (matchup-specific runs).
    pub matchups: Vec<u16>,
}

/// The log posterior of the linear-Gaussian lineup model, with analytic
/// gradients. Parameter vector layout (unconstrained space):
/// `[log_sigma, block_0, block_1, ...]` where each block is
/// `[alpha, off_raw[K], def_raw[K]]`; the global parameterization has one
/// block, the matchup-specific one has a block per observed matchup.
struct Posterior {
    rows: Vec<TrainingRow>,
    block_of_row: Vec<usize>,
    blocks: usize,
    constraint: ConstraintMode,
    dim: usize,
}

impl Posterior {
    fn new(rows: &[TrainingRow], kind: ParameterizationKind, constraint: ConstraintMode) -> (Self, Vec<u16>) {
        let mut matchups: Vec<u16> = match kind {
            ParameterizationKind::Global => vec![],
            ParameterizationKind::MatchupSpecific => {
                let mut ids: Vec<u16> = rows.iter().map(|r| r.matchup).collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            }
        };
        let blocks = match kind {
            ParameterizationKind::Global => 1,
            ParameterizationKind::MatchupSpecific => matchups.len(),
        };
        let block_index: HashMap<u16, usize> = matchups
            .iter()
            .enumerate()
            .map(|(idx, id)| (*id, idx))
            .collect();
        let block_of_row = rows
            .iter()
            .map(|r| match kind {
                ParameterizationKind::Global => 0,
                ParameterizationKind::MatchupSpecific => block_index[&r.matchup],
            })
            .collect();
        if matchups.is_empty() {
            matchups = vec![0];
        }
        let dim = 1 + blocks * (1 + 2 * K);
        (
            Posterior {
                rows: rows.to_vec(),
                block_of_row,
                blocks,
                constraint,
                dim,
            },
            matchups,
        )
    }

    fn block_base(&self, block: usize) -> usize {
        1 + block * (1 + 2 * K)
    }

    fn skill(&self, raw: f64) -> f64 {
        match self.constraint {
            ConstraintMode::Constrained => raw.exp(),
            ConstraintMode::Unconstrained => raw,
        }
    }

    fn skill_grad(&self, raw: f64) -> f64 {
        match self.constraint {
            ConstraintMode::Constrained => raw.exp(),
            ConstraintMode::Unconstrained => 1.0,
        }
    }

    /// Log posterior density and its gradient in unconstrained space.
    /// Returns `-inf` on numerical overflow; the sampler treats that state
    /// as divergent.
    fn logp_grad(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
        grad.iter_mut().for_each(|g| *g = 0.0);
        let n = self.rows.len() as f64;
        let log_sigma = theta[0];
        let sigma = log_sigma.exp();
        let inv_var = 1.0 / (sigma * sigma);

        // Transform each block once, not once per row.
        let mut alpha = vec![0.0; self.blocks];
        let mut b_off = vec![[0.0; K]; self.blocks];
        let mut b_def = vec![[0.0; K]; self.blocks];
        for b in 0..self.blocks {
            let base = self.block_base(b);
            alpha[b] = theta[base];
            for j in 0..K {
                b_off[b][j] = self.skill(theta[base + 1 + j]);
                b_def[b][j] = self.skill(theta[base + 1 + K + j]);
            }
        }

        let mut logp = -n * log_sigma - 0.5 * n * LN_2PI;
        let mut g_alpha = vec![0.0; self.blocks];
        let mut g_off = vec![[0.0; K]; self.blocks];
        let mut g_def = vec![[0.0; K]; self.blocks];
        let mut g_log_sigma = 0.0;

        for (row, &b) in self.rows.iter().zip(&self.block_of_row) {
            let mut mu = alpha[b];
            for j in 0..K {
                mu += row.off[j] * b_off[b][j];
                mu -= row.def[j] * b_def[b][j];
            }
            let r = row.y - mu;
            let r2 = r * r * inv_var;
            logp -= 0.5 * r2;
            let g = r * inv_var;
            g_alpha[b] += g;
            for j in 0..K {
                g_off[b][j] += g * row.off[j];
                g_def[b][j] -= g * row.def[j];
            }
            g_log_sigma += r2;
        }

        // Half-Normal prior on sigma, applied on the log scale with its
        // Jacobian.
        logp += -0.5 * (sigma / SIGMA_PRIOR_SD).powi(2) + log_sigma;
        grad[0] = g_log_sigma - n - sigma * sigma / (SIGMA_PRIOR_SD * SIGMA_PRIOR_SD) + 1.0;

        for b in 0..self.blocks {
            let base = self.block_base(b);
            logp += -0.5 * (alpha[b] / INTERCEPT_PRIOR_SD).powi(2);
            grad[base] = g_alpha[b] - alpha[b] / (INTERCEPT_PRIOR_SD * INTERCEPT_PRIOR_SD);
            for j in 0..K {
                let raw_off = theta[base + 1 + j];
                let raw_def = theta[base + 1 + K + j];
                let (p_off, gp_off) = self.skill_prior(raw_off, b_off[b][j]);
                let (p_def, gp_def) = self.skill_prior(raw_def, b_def[b][j]);
                logp += p_off + p_def;
                grad[base + 1 + j] = g_off[b][j] * self.skill_grad(raw_off) + gp_off;
                grad[base + 1 + K + j] = g_def[b][j] * self.skill_grad(raw_def) + gp_def;
            }
        }

        if logp.is_finite() { logp } else { f64::NEG_INFINITY }
    }

    /// Prior log density contribution of one skill coefficient plus its
    /// gradient w.r.t. the raw (unconstrained) parameter, Jacobian included
    /// in constrained mode.
    fn skill_prior(&self, raw: f64, beta: f64) -> (f64, f64) {
        let var = SKILL_PRIOR_SD * SKILL_PRIOR_SD;
        match self.constraint {
            ConstraintMode::Constrained => {
                (-0.5 * beta * beta / var + raw, -beta * beta / var + 1.0)
            }
            ConstraintMode::Unconstrained => (-0.5 * beta * beta / var, -beta / var),
        }
    }

    /// Map an unconstrained draw to the constrained (reporting) scale.
    fn constrain_draw(&self, theta: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(theta.len());
        out.push(theta[0].exp());
        for b in 0..self.blocks {
            let base = self.block_base(b);
            out.push(theta[base]);
            for j in 0..2 * K {
                out.push(self.skill(theta[base + 1 + j]));
            }
        }
        out
    }
}

pub fn param_names(kind: ParameterizationKind, matchups: &[u16]) -> Vec<String> {
    let mut names = vec!["sigma".to_string()];
    let blocks: Vec<String> = match kind {
        ParameterizationKind::Global => vec![String::new()],
        ParameterizationKind::MatchupSpecific => {
            matchups.iter().map(|m| format!("[m{m}]")).collect()
        }
    };
    for tag in &blocks {
        names.push(format!("alpha{tag}"));
        for j in 0..K {
            names.push(format!("beta_off{tag}[{j}]"));
        }
        for j in 0..K {
            names.push(format!("beta_def{tag}[{j}]"));
        }
    }
    names
}

struct ChainOutput {
    chain_id: usize,
    /// Retained draws on the constrained scale.
    draws: Vec<Vec<f64>>,
    divergences: usize,
    depth_exhaustions: usize,
    truncated: bool,
}

struct Transition {
    theta: Vec<f64>,
    grad: Vec<f64>,
    logp: f64,
    accept_stat: f64,
    divergent: bool,
    depth_exhausted: bool,
}

fn kinetic(p: &[f64], inv_mass: &[f64]) -> f64 {
    p.iter()
        .zip(inv_mass)
        .map(|(pi, im)| 0.5 * pi * pi * im)
        .sum()
}

fn log_add_exp(a: f64, b: f64) -> f64 {
    let hi = a.max(b);
    let lo = a.min(b);
    hi + (lo - hi).exp().ln_1p()
}

/// One HMC transition: doubling trajectory, endpoint U-turn termination,
/// progressive multinomial selection of the next state. Divergent
/// trajectories reject back to the current state.
#[allow(clippy::too_many_arguments)]
fn hmc_transition(
    post: &Posterior,
    theta0: &[f64],
    grad0: &[f64],
    logp0: f64,
    eps: f64,
    inv_mass: &[f64],
    max_depth: usize,
    rng: &mut StdRng,
) -> Transition {
    let dim = theta0.len();
    let p0: Vec<f64> = inv_mass
        .iter()
        .map(|im| {
            let z: f64 = rng.sample(StandardNormal);
            z / im.sqrt()
        })
        .collect();
    let h0 = -logp0 + kinetic(&p0, inv_mass);
    if !h0.is_finite() {
        return Transition {
            theta: theta0.to_vec(),
            grad: grad0.to_vec(),
            logp: logp0,
            accept_stat: 0.0,
            divergent: true,
            depth_exhausted: false,
        };
    }

    let mut left_theta = theta0.to_vec();
    let mut left_p = p0.clone();
    let mut left_grad = grad0.to_vec();
    let mut right_theta = theta0.to_vec();
    let mut right_p = p0.clone();
    let mut right_grad = grad0.to_vec();

    let mut cand_theta = theta0.to_vec();
    let mut cand_grad = grad0.to_vec();
    let mut cand_logp = logp0;
    let mut log_sum_w = 0.0;
    let mut sum_accept = 0.0;
    let mut states = 0usize;
    let mut divergent = false;
    let mut depth_exhausted = false;

    'doubling: for depth in 0..max_depth {
        let forward = rng.gen_bool(0.5);
        let steps = 1usize << depth;
        for _ in 0..steps {
            let (theta, p, grad) = if forward {
                (&mut right_theta, &mut right_p, &mut right_grad)
            } else {
                (&mut left_theta, &mut left_p, &mut left_grad)
            };
            let e = if forward { eps } else { -eps };

            for i in 0..dim {
                p[i] += 0.5 * e * grad[i];
            }
            for i in 0..dim {
                theta[i] += e * inv_mass[i] * p[i];
            }
            let logp = post.logp_grad(theta, grad);
            for i in 0..dim {
                p[i] += 0.5 * e * grad[i];
            }

            let h = -logp + kinetic(p, inv_mass);
            if !h.is_finite() || h - h0 > DIVERGENCE_ENERGY_LIMIT {
                divergent = true;
                break 'doubling;
            }

            let log_w = h0 - h;
            let new_total = log_add_exp(log_sum_w, log_w);
            let pick: f64 = rng.r#gen();
            if pick.ln() < log_w - new_total {
                cand_theta.copy_from_slice(theta);
                cand_grad.copy_from_slice(grad);
                cand_logp = logp;
            }
            log_sum_w = new_total;
            sum_accept += log_w.min(0.0).exp();
            states += 1;
        }

        // U-turn between the trajectory endpoints, in velocity space.
        let mut along_left = 0.0;
        let mut along_right = 0.0;
        for i in 0..dim {
            let d = right_theta[i] - left_theta[i];
            along_left += d * inv_mass[i] * left_p[i];
            along_right += d * inv_mass[i] * right_p[i];
        }
        if along_left < 0.0 || along_right < 0.0 {
            break;
        }
        if depth + 1 == max_depth {
            depth_exhausted = true;
        }
    }

    let accept_stat = if states == 0 {
        0.0
    } else {
        sum_accept / states as f64
    };

    if divergent {
        Transition {
            theta: theta0.to_vec(),
            grad: grad0.to_vec(),
            logp: logp0,
            accept_stat,
            divergent: true,
            depth_exhausted,
        }
    } else {
        Transition {
            theta: cand_theta,
            grad: cand_grad,
            logp: cand_logp,
            accept_stat,
            divergent: false,
            depth_exhausted,
        }
    }
}

struct DualAveraging {
    mu: f64,
    log_eps: f64,
    log_eps_bar: f64,
    h_bar: f64,
    t: f64,
    target: f64,
}

impl DualAveraging {
    fn new(eps0: f64, target: f64) -> Self {
        DualAveraging {
            mu: (10.0 * eps0).ln(),
            log_eps: eps0.ln(),
            log_eps_bar: eps0.ln(),
            h_bar: 0.0,
            t: 0.0,
            target,
        }
    }

    fn update(&mut self, accept_stat: f64) {
        self.t += 1.0;
        self.h_bar += (self.target - accept_stat - self.h_bar) / (self.t + DA_T0);
        self.log_eps = self.mu - self.t.sqrt() / DA_GAMMA * self.h_bar;
        let eta = self.t.powf(-DA_KAPPA);
        self.log_eps_bar = eta * self.log_eps + (1.0 - eta) * self.log_eps_bar;
    }

    fn current(&self) -> f64 {
        self.log_eps.exp().clamp(1e-8, 10.0)
    }

    fn adapted(&self) -> f64 {
        self.log_eps_bar.exp().clamp(1e-8, 10.0)
    }
}

fn find_initial_step_size(
    post: &Posterior,
    theta: &[f64],
    inv_mass: &[f64],
    rng: &mut StdRng,
) -> f64 {
    let dim = theta.len();
    let mut grad = vec![0.0; dim];
    let logp0 = post.logp_grad(theta, &mut grad);
    let p0: Vec<f64> = inv_mass
        .iter()
        .map(|im| {
            let z: f64 = rng.sample(StandardNormal);
            z / im.sqrt()
        })
        .collect();
    let h0 = -logp0 + kinetic(&p0, inv_mass);

    let probe = |eps: f64| -> f64 {
        let mut th = theta.to_vec();
        let mut p = p0.clone();
        let mut g = grad.clone();
        for i in 0..dim {
            p[i] += 0.5 * eps * g[i];
        }
        for i in 0..dim {
            th[i] += eps * inv_mass[i] * p[i];
        }
        let lp = post.logp_grad(&th, &mut g);
        for i in 0..dim {
            p[i] += 0.5 * eps * g[i];
        }
        let h = -lp + kinetic(&p, inv_mass);
        h0 - h
    };

    let mut eps = 1.0;
    let mut a = probe(eps);
    let mut tries = 0;
    while !a.is_finite() && tries < 60 {
        eps *= 0.5;
        a = probe(eps);
        tries += 1;
    }
    if !a.is_finite() {
        return 1e-3;
    }

    let half_ln = (0.5f64).ln();
    let dir = if a > half_ln { 1.0 } else { -1.0 };
    for _ in 0..100 {
        eps *= 2f64.powf(dir);
        a = probe(eps);
        let keep_going = if dir > 0.0 {
            a.is_finite() && a > half_ln
        } else {
            !a.is_finite() || a < half_ln
        };
        if !keep_going {
            break;
        }
    }
    eps.clamp(1e-8, 10.0)
}

fn run_chain(
    post: &Posterior,
    config: &EstimatorConfig,
    chain_id: usize,
    deadline: Option<Instant>,
) -> ChainOutput {
    let mut rng = StdRng::seed_from_u64(
        config
            .seed
            .wrapping_add((chain_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
    );
    let dim = post.dim;

    // Start at a data-informed noise scale with jittered coefficients; the
    // jitter gives chains distinct starting points.
    let n = post.rows.len() as f64;
    let mean_y = post.rows.iter().map(|r| r.y).sum::<f64>() / n;
    let var_y = post
        .rows
        .iter()
        .map(|r| (r.y - mean_y) * (r.y - mean_y))
        .sum::<f64>()
        / n.max(1.0);
    let mut theta = vec![0.0; dim];
    theta[0] = var_y.sqrt().max(0.1).ln();
    for value in theta.iter_mut() {
        *value += rng.gen_range(-0.1..0.1);
    }

    let mut inv_mass = vec![1.0; dim];
    let mut grad = vec![0.0; dim];
    let mut logp = post.logp_grad(&theta, &mut grad);
    let mut eps = find_initial_step_size(post, &theta, &inv_mass, &mut rng);
    let mut da = DualAveraging::new(eps, config.target_accept);

    // Mass-matrix estimation window inside warm-up.
    let window_start = config.warmup / 4;
    let window_end = (3 * config.warmup) / 4;
    let mut window: Vec<Vec<f64>> = Vec::new();

    let mut truncated = false;
    for t in 0..config.warmup {
        if hit_deadline(deadline, t) {
            truncated = true;
            break;
        }
        let step = da.current();
        let trans = hmc_transition(
            post, &theta, &grad, logp, step, &inv_mass, config.max_depth, &mut rng,
        );
        theta = trans.theta;
        grad = trans.grad;
        logp = trans.logp;
        da.update(trans.accept_stat);

        if t >= window_start && t < window_end {
            window.push(theta.clone());
        }
        if t + 1 == window_end && window.len() >= 10 {
            inv_mass = regularized_variance(&window);
            window.clear();
            // The metric changed under the sampler; re-tune the step size.
            eps = find_initial_step_size(post, &theta, &inv_mass, &mut rng);
            da = DualAveraging::new(eps, config.target_accept);
        }
    }
    eps = da.adapted();

    let mut draws = Vec::with_capacity(config.samples);
    let mut divergences = 0usize;
    let mut depth_exhaustions = 0usize;
    if !truncated {
        for t in 0..config.samples {
            if hit_deadline(deadline, t) {
                truncated = true;
                break;
            }
            let trans = hmc_transition(
                post, &theta, &grad, logp, eps, &inv_mass, config.max_depth, &mut rng,
            );
            theta = trans.theta;
            grad = trans.grad;
            logp = trans.logp;
            if trans.divergent {
                divergences += 1;
            }
            if trans.depth_exhausted {
                depth_exhaustions += 1;
            }
            draws.push(post.constrain_draw(&theta));
        }
    }

    ChainOutput {
        chain_id,
        draws,
        divergences,
        depth_exhaustions,
        truncated,
    }
}

fn hit_deadline(deadline: Option<Instant>, iter: usize) -> bool {
    // Clock checks are cheap but pointless every iteration.
    if iter % 16 != 0 {
        return false;
    }
    match deadline {
        Some(d) => Instant::now() >= d,
        None => false,
    }
}

fn regularized_variance(window: &[Vec<f64>]) -> Vec<f64> {
    let n = window.len() as f64;
    let dim = window[0].len();
    let mut mean = vec![0.0; dim];
    for draw in window {
        for i in 0..dim {
            mean[i] += draw[i];
        }
    }
    for m in mean.iter_mut() {
        *m /= n;
    }
    let mut var = vec![0.0; dim];
    for draw in window {
        for i in 0..dim {
            let d = draw[i] - mean[i];
            var[i] += d * d;
        }
    }
    let shrink = n / (n + 5.0);
    var.iter()
        .map(|v| (shrink * v / (n - 1.0).max(1.0) + 1e-3 * (1.0 - shrink)).clamp(1e-6, 1e6))
        .collect()
}

/// Run the full estimation: M independent chains in parallel, each with its
/// own random stream and draw buffer, combined only afterward for
/// diagnostics and posterior summaries.
pub fn run(rows: &[TrainingRow], config: &EstimatorConfig) -> Result<FitResult> {
    if rows.is_empty() {
        return Err(anyhow!("estimator received an empty training table"));
    }
    if config.chains < 2 {
        return Err(anyhow!(
            "at least 2 chains are required for convergence diagnostics (got {})",
            config.chains
        ));
    }
    if config.samples == 0 || config.warmup == 0 {
        return Err(anyhow!("warmup and samples must both be positive"));
    }
    if !(0.0..1.0).contains(&config.target_accept) || config.target_accept <= 0.0 {
        return Err(anyhow!(
            "target accept must lie in (0, 1), got {}",
            config.target_accept
        ));
    }

    let started = Instant::now();
    let deadline = config.timeout.map(|t| started + t);
    let (posterior, matchups) = Posterior::new(rows, config.kind, config.constraint);
    let posterior = Arc::new(posterior);
    let names = param_names(config.kind, &matchups);

    let (tx, rx) = mpsc::channel::<ChainOutput>();
    for chain_id in 0..config.chains {
        let post = Arc::clone(&posterior);
        let cfg = config.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            let out = run_chain(&post, &cfg, chain_id, deadline);
            let _ = tx.send(out);
        });
    }
    drop(tx);

    let mut outputs: Vec<ChainOutput> = Vec::with_capacity(config.chains);
    let mut timed_out = false;
    while outputs.len() < config.chains {
        let remaining = match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    // Grace period so chains that noticed the deadline can
                    // still deliver their partial buffers.
                    Duration::from_millis(250)
                } else {
                    d - now + Duration::from_millis(250)
                }
            }
            None => Duration::from_secs(24 * 3600),
        };
        match rx.recv_timeout(remaining) {
            Ok(out) => outputs.push(out),
            Err(_) => {
                timed_out = true;
                break;
            }
        }
    }
    outputs.sort_by_key(|o| o.chain_id);

    let truncated_chains = outputs.iter().filter(|o| o.truncated).count();
    let incomplete = timed_out || truncated_chains > 0 || outputs.len() < config.chains;
    let completed: Vec<&ChainOutput> = outputs.iter().filter(|o| !o.draws.is_empty()).collect();
    if completed.is_empty() {
        return Err(anyhow!(
            "no chain produced draws ({} of {} chains reported, {} truncated)",
            outputs.len(),
            config.chains,
            truncated_chains
        ));
    }

    let divergences: usize = completed.iter().map(|o| o.divergences).sum();
    let depth_exhaustions: usize = completed.iter().map(|o| o.depth_exhaustions).sum();
    let chain_draws: Vec<Vec<Vec<f64>>> =
        completed.iter().map(|o| o.draws.clone()).collect();

    let diagnostics = diagnostics::summarize_run(
        &chain_draws,
        &names,
        divergences,
        depth_exhaustions,
        config.chains,
        incomplete,
        started.elapsed().as_secs_f64(),
    );

    let (mean, sd) = posterior_summary(&chain_draws, names.len());
    let coefficients = build_coefficients(config.kind, &matchups, &mean);

    Ok(FitResult {
        coefficients,
        diagnostics,
        param_names: names,
        posterior_mean: mean,
        posterior_sd: sd,
        matchups,
    })
}

fn posterior_summary(chains: &[Vec<Vec<f64>>], dim: usize) -> (Vec<f64>, Vec<f64>) {
    let mut mean = vec![0.0; dim];
    let mut count = 0usize;
    for chain in chains {
        for draw in chain {
            for i in 0..dim {
                mean[i] += draw[i];
            }
            count += 1;
        }
    }
    for m in mean.iter_mut() {
        *m /= count.max(1) as f64;
    }
    let mut sd = vec![0.0; dim];
    for chain in chains {
        for draw in chain {
            for i in 0..dim {
                let d = draw[i] - mean[i];
                sd[i] += d * d;
            }
        }
    }
    for s in sd.iter_mut() {
        *s = (*s / (count.saturating_sub(1).max(1) as f64)).sqrt();
    }
    (mean, sd)
}

fn build_coefficients(
    kind: ParameterizationKind,
    matchups: &[u16],
    mean: &[f64],
) -> CoefficientSet {
    let sigma = mean[0];
    let block_row = |block: usize| -> CoefficientRow {
        let base = 1 + block * (1 + 2 * K);
        let mut row = CoefficientRow {
            intercept: mean[base],
            off: [0.0; K],
            def: [0.0; K],
        };
        for j in 0..K {
            row.off[j] = mean[base + 1 + j];
            row.def[j] = mean[base + 1 + K + j];
        }
        row
    };
    match kind {
        ParameterizationKind::Global => CoefficientSet::Global {
            row: block_row(0),
            sigma,
        },
        ParameterizationKind::MatchupSpecific => {
            let rows = matchups
                .iter()
                .enumerate()
                .map(|(block, id)| (*id, block_row(block)))
                .collect();
            CoefficientSet::MatchupSpecific { rows, sigma }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_rows(n: usize, seed: u64) -> Vec<TrainingRow> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::with_capacity(n);
        for i in 0..n {
            let mut off = [0.0; K];
            let mut def = [0.0; K];
            for j in 0..K {
                off[j] = rng.gen_range(-1.0..1.0);
                def[j] = rng.gen_range(-1.0..1.0);
            }
            rows.push(TrainingRow {
                off,
                def,
                matchup: (i % 3) as u16,
                y: rng.gen_range(0.0..2.5),
            });
        }
        rows
    }

    fn check_gradient(constraint: ConstraintMode, kind: ParameterizationKind) {
        let rows = synthetic_rows(12, 7);
        let (post, _) = Posterior::new(&rows, kind, constraint);
        let mut rng = StdRng::seed_from_u64(3);
        let theta: Vec<f64> = (0..post.dim).map(|_| rng.gen_range(-0.4..0.4)).collect();

        let mut grad = vec![0.0; post.dim];
        let logp = post.logp_grad(&theta, &mut grad);
        assert!(logp.is_finite());

        let h = 1e-6;
        let mut scratch = vec![0.0; post.dim];
        for i in 0..post.dim {
            let mut plus = theta.clone();
            plus[i] += h;
            let mut minus = theta.clone();
            minus[i] -= h;
            let lp_plus = post.logp_grad(&plus, &mut scratch);
            let lp_minus = post.logp_grad(&minus, &mut scratch);
            let numeric = (lp_plus - lp_minus) / (2.0 * h);
            let scale = numeric.abs().max(grad[i].abs()).max(1.0);
            assert!(
                (numeric - grad[i]).abs() / scale < 1e-4,
                "param {i}: analytic {} vs numeric {numeric}",
                grad[i]
            );
        }
    }

    #[test]
    fn gradients_match_finite_differences_unconstrained() {
        check_gradient(ConstraintMode::Unconstrained, ParameterizationKind::Global);
        check_gradient(
            ConstraintMode::Unconstrained,
            ParameterizationKind::MatchupSpecific,
        );
    }

    #[test]
    fn gradients_match_finite_differences_constrained() {
        check_gradient(ConstraintMode::Constrained, ParameterizationKind::Global);
        check_gradient(
            ConstraintMode::Constrained,
            ParameterizationKind::MatchupSpecific,
        );
    }

    #[test]
    fn chains_are_reproducible_for_a_fixed_seed() {
        let rows = synthetic_rows(40, 11);
        let config = EstimatorConfig {
            kind: ParameterizationKind::Global,
            constraint: ConstraintMode::Unconstrained,
            chains: 2,
            warmup: 60,
            samples: 40,
            max_depth: 5,
            seed: 99,
            ..EstimatorConfig::default()
        };
        let a = run(&rows, &config).unwrap();
        let b = run(&rows, &config).unwrap();
        assert_eq!(a.posterior_mean, b.posterior_mean);
        assert_eq!(a.diagnostics.divergences, b.diagnostics.divergences);
    }

    #[test]
    fn fewer_than_two_chains_is_rejected() {
        let rows = synthetic_rows(10, 1);
        let config = EstimatorConfig {
            chains: 1,
            ..EstimatorConfig::default()
        };
        assert!(run(&rows, &config).is_err());
    }

    #[test]
    fn timeout_yields_partial_incomplete_run_or_error() {
        let rows = synthetic_rows(60, 5);
        let config = EstimatorConfig {
            kind: ParameterizationKind::Global,
            constraint: ConstraintMode::Unconstrained,
            chains: 2,
            warmup: 5_000,
            samples: 5_000,
            max_depth: 6,
            seed: 4,
            timeout: Some(Duration::from_millis(50)),
            ..EstimatorConfig::default()
        };
        match run(&rows, &config) {
            Ok(result) => assert!(result.diagnostics.incomplete),
            Err(err) => assert!(err.to_string().contains("no chain produced draws")),
        }
    }
}
