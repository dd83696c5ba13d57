//! Reversible rate matrices and their transition probabilities.
//!
//! A time-reversible generator `Q` satisfies `π_i Q_ij = π_j Q_ji`, so
//!
//! ```text
//! B = Π^{1/2} Q Π^{-1/2}
//! ```
//!
//! is symmetric and can be diagonalised with Jacobi rotations as
//! `B = U Λ Uᵀ`. Then
//!
//! ```text
//! P(t) = exp(Qt) = Π^{-1/2} U exp(Λt) Uᵀ Π^{1/2}
//! ```
//!
//! The decomposition is done once per parameter set; evaluating `P(t)` for a
//! new branch length only costs `k³` multiply-adds.

use crate::error::{PhyloError, Result};

const JACOBI_SWEEPS: usize = 100;

/// Eigen-decomposed, mean-rate-one reversible generator over `k` states.
#[derive(Debug, Clone, PartialEq)]
pub struct RateMatrix {
    k: usize,
    freqs: Vec<f64>,
    /// Normalised generator, flat `k*i+j`.
    q: Vec<f64>,
    eigenvalues: Vec<f64>,
    /// `Π^{-1/2} U`, flat `k*i+m`.
    left: Vec<f64>,
    /// `Uᵀ Π^{1/2}`, flat `k*m+j`.
    right: Vec<f64>,
}

impl RateMatrix {
    /// Build `Q_ij = S_ij π_j` from a symmetric exchangeability matrix `S`
    /// (flat `k*i+j`) and stationary frequencies, scaled to mean rate one.
    ///
    /// # Errors
    /// [`PhyloError::Validation`] if the sizes disagree or a frequency is not
    /// strictly positive.
    pub fn new(exchangeabilities: &[f64], freqs: &[f64]) -> Result<Self> {
        let k = freqs.len();
        if k < 2 || exchangeabilities.len() != k * k {
            return Err(PhyloError::Validation(format!(
                "rate matrix needs {k}x{k} exchangeabilities, got {}",
                exchangeabilities.len()
            )));
        }
        if freqs.iter().any(|f| !f.is_finite() || *f <= 0.0) {
            return Err(PhyloError::Validation("state frequencies must be positive".into()));
        }

        let mut q = vec![0.0; k * k];
        for i in 0..k {
            let mut row = 0.0;
            for j in (0..k).filter(|&j| j != i) {
                q[k * i + j] = exchangeabilities[k * i + j] * freqs[j];
                row += q[k * i + j];
            }
            q[k * i + i] = -row;
        }
        let mu: f64 = (0..k).map(|i| -freqs[i] * q[k * i + i]).sum();
        if mu > 0.0 {
            q.iter_mut().for_each(|x| *x /= mu);
        }

        let sqrt_pi: Vec<f64> = freqs.iter().map(|f| f.sqrt()).collect();
        let mut b = vec![0.0; k * k];
        for i in 0..k {
            for j in 0..k {
                b[k * i + j] = sqrt_pi[i] * q[k * i + j] / sqrt_pi[j];
            }
        }
        // Symmetrise away rounding noise.
        for i in 0..k {
            for j in i + 1..k {
                let m = 0.5 * (b[k * i + j] + b[k * j + i]);
                b[k * i + j] = m;
                b[k * j + i] = m;
            }
        }

        let (eigenvalues, u) = jacobi_eigen(b, k);
        let mut left = vec![0.0; k * k];
        let mut right = vec![0.0; k * k];
        for i in 0..k {
            for m in 0..k {
                left[k * i + m] = u[k * i + m] / sqrt_pi[i];
                right[k * m + i] = u[k * i + m] * sqrt_pi[i];
            }
        }

        Ok(RateMatrix { k, freqs: freqs.to_vec(), q, eigenvalues, left, right })
    }

    pub fn num_states(&self) -> usize {
        self.k
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    /// Generator entry `Q_ij`.
    pub fn rate(&self, i: usize, j: usize) -> f64 {
        self.q[self.k * i + j]
    }

    pub fn eigenvalues(&self) -> &[f64] {
        &self.eigenvalues
    }

    /// Write `P(t)` into `out` (flat `k*i+j`). Tiny negative entries from
    /// rounding are clamped to zero.
    pub fn transition(&self, t: f64, out: &mut [f64]) {
        let k = self.k;
        let exps: Vec<f64> = self.eigenvalues.iter().map(|l| (l * t).exp()).collect();
        for i in 0..k {
            for j in 0..k {
                let mut sum = 0.0;
                for m in 0..k {
                    sum += self.left[k * i + m] * exps[m] * self.right[k * m + j];
                }
                out[k * i + j] = sum.max(0.0);
            }
        }
    }

    /// Allocating variant of [`RateMatrix::transition`].
    pub fn transition_matrix(&self, t: f64) -> Vec<f64> {
        let mut out = vec![0.0; self.k * self.k];
        self.transition(t, &mut out);
        out
    }
}

/// Cyclic Jacobi eigen decomposition of a symmetric `n x n` matrix (flat).
///
/// Returns the eigenvalues and the eigenvector matrix `V` with eigenvector
/// `m` in column `m` (`v[n*i+m]`).
fn jacobi_eigen(mut a: Vec<f64>, n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut v = vec![0.0; n * n];
    for i in 0..n {
        v[n * i + i] = 1.0;
    }

    for _ in 0..JACOBI_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|p| (p + 1..n).map(move |q| (p, q)))
            .map(|(p, q)| a[n * p + q].abs())
            .sum();
        if off < 1e-15 {
            break;
        }
        for p in 0..n {
            for q in p + 1..n {
                let apq = a[n * p + q];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let theta = (a[n * q + q] - a[n * p + p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for r in 0..n {
                    let (arp, arq) = (a[n * r + p], a[n * r + q]);
                    a[n * r + p] = c * arp - s * arq;
                    a[n * r + q] = s * arp + c * arq;
                }
                for r in 0..n {
                    let (apr, aqr) = (a[n * p + r], a[n * q + r]);
                    a[n * p + r] = c * apr - s * aqr;
                    a[n * q + r] = s * apr + c * aqr;
                }
                a[n * p + q] = 0.0;
                a[n * q + p] = 0.0;

                for r in 0..n {
                    let (vrp, vrq) = (v[n * r + p], v[n * r + q]);
                    v[n * r + p] = c * vrp - s * vrq;
                    v[n * r + q] = s * vrp + c * vrq;
                }
            }
        }
    }

    let eigenvalues = (0..n).map(|i| a[n * i + i]).collect();
    (eigenvalues, v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_exchange(k: usize) -> Vec<f64> {
        let mut s = vec![1.0; k * k];
        for i in 0..k {
            s[k * i + i] = 0.0;
        }
        s
    }

    fn gtr() -> RateMatrix {
        let s = [
            0.0, 1.2, 0.5, 0.9, //
            1.2, 0.0, 0.7, 4.1, //
            0.5, 0.7, 0.0, 1.0, //
            0.9, 4.1, 1.0, 0.0,
        ];
        RateMatrix::new(&s, &[0.1, 0.2, 0.3, 0.4]).unwrap()
    }

    #[test]
    fn generator_rows_sum_to_zero_with_unit_mean_rate() {
        let q = gtr();
        let freqs = q.freqs().to_vec();
        let mut mean = 0.0;
        for i in 0..4 {
            let row: f64 = (0..4).map(|j| q.rate(i, j)).sum();
            assert!(row.abs() <= 1e-12);
            mean -= freqs[i] * q.rate(i, i);
        }
        assert!((mean - 1.0).abs() <= 1e-12);
    }

    #[test]
    fn zero_time_is_identity() {
        let p = gtr().transition_matrix(0.0);
        for i in 0..4 {
            for j in 0..4 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((p[4 * i + j] - expected).abs() <= 1e-10);
            }
        }
    }

    #[test]
    fn rows_are_distributions_and_reversible() {
        let q = gtr();
        for t in [0.01, 0.3, 2.0] {
            let p = q.transition_matrix(t);
            for i in 0..4 {
                let row: f64 = p[4 * i..4 * i + 4].iter().sum();
                assert!((row - 1.0).abs() <= 1e-10);
                for j in 0..4 {
                    let flow = q.freqs()[i] * p[4 * i + j] - q.freqs()[j] * p[4 * j + i];
                    assert!(flow.abs() <= 1e-10);
                }
            }
        }
    }

    #[test]
    fn long_branches_reach_stationarity() {
        let q = gtr();
        let p = q.transition_matrix(200.0);
        for i in 0..4 {
            for j in 0..4 {
                assert!((p[4 * i + j] - q.freqs()[j]).abs() <= 1e-8);
            }
        }
    }

    #[test]
    fn jukes_cantor_closed_form() {
        let q = RateMatrix::new(&unit_exchange(4), &[0.25; 4]).unwrap();
        for t in [0.05, 0.5, 1.5] {
            let p = q.transition_matrix(t);
            let same = 0.25 + 0.75 * (-4.0 * t / 3.0f64).exp();
            let diff = 0.25 - 0.25 * (-4.0 * t / 3.0f64).exp();
            assert!((p[0] - same).abs() <= 1e-10);
            assert!((p[1] - diff).abs() <= 1e-10);
        }
    }

    #[test]
    fn poisson_over_twenty_states() {
        let q = RateMatrix::new(&unit_exchange(20), &[0.05; 20]).unwrap();
        let p = q.transition_matrix(0.4);
        let same = 0.05 + 0.95 * (-0.4 * 20.0 / 19.0f64).exp();
        assert!((p[0] - same).abs() <= 1e-9);
        for i in 0..20 {
            let row: f64 = p[20 * i..20 * i + 20].iter().sum();
            assert!((row - 1.0).abs() <= 1e-9);
        }
    }

    #[test]
    fn rejects_bad_input() {
        assert!(RateMatrix::new(&[0.0; 9], &[0.25; 4]).is_err());
        assert!(RateMatrix::new(&unit_exchange(4), &[0.5, 0.5, 0.0, 0.0]).is_err());
    }
}
