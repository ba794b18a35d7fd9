//! Non-randomness (NR) termination table.
//!
//! For a population size `n` and outlier ratio `beta`, precomputes the
//! smallest support count `k*(n)` such that `P(Bin(n, beta) >= k*)` falls
//! below a tail-probability threshold. The PROSAC controller consults this
//! table to decide whether an inlier set is "non-random enough" to tighten
//! the iteration budget.

/// Tail-probability threshold below which a support count is deemed
/// non-random, matching the common RHO/USAC choice of a tight one-sided
/// bound precomputed as a curve indexed by `n`.
const NR_THRESHOLD: f64 = 0.05;

pub(crate) struct NrTable {
    /// `table[n]` (for `n` in `[min_inl, size]`) is `k*(n)`; entries below
    /// `min_inl` are unused (left at 0) since support below `min_inl` is
    /// never a candidate regardless of NR.
    table: Vec<u32>,
    beta: f64,
    min_inl: usize,
}

impl NrTable {
    pub(crate) fn new() -> Self {
        Self {
            table: Vec::new(),
            beta: 0.0,
            min_inl: 4,
        }
    }

    /// Grows the table to cover `n` entries at the given `beta`, preserving
    /// existing entries when `beta` is unchanged and recomputing when it
    /// changes. `n == 0` releases the table.
    pub(crate) fn ensure_capacity(&mut self, n: usize, beta: f64, min_inl: usize) {
        if n == 0 {
            self.release();
            return;
        }
        let beta_changed = (self.beta - beta).abs() > 1e-15;
        let min_inl_changed = min_inl != self.min_inl;
        if beta_changed || min_inl_changed {
            self.beta = beta;
            self.min_inl = min_inl;
            self.table = (0..=n).map(|k| Self::k_star(k, beta, min_inl)).collect();
            return;
        }
        if n + 1 > self.table.len() {
            let start = self.table.len();
            self.table.reserve(n + 1 - start);
            for k in start..=n {
                self.table.push(Self::k_star(k, beta, self.min_inl));
            }
        }
    }

    pub(crate) fn release(&mut self) {
        self.table = Vec::new();
        self.beta = 0.0;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Smallest support count `k` such that `P(Bin(n, beta) >= k) < threshold`,
    /// or `n + 1` (i.e. unreachable) if no such `k <= n` exists.
    pub(crate) fn k_star_for(&self, n: usize) -> u32 {
        if n < self.table.len() {
            self.table[n]
        } else {
            (n + 1) as u32
        }
    }

    fn k_star(n: usize, beta: f64, min_inl: usize) -> u32 {
        if n < min_inl || beta <= 0.0 || beta >= 1.0 {
            return (n + 1) as u32;
        }
        // Walk k from n down to 0, accumulating the exact tail probability
        // P(Bin(n, beta) >= k) via the PMF recurrence
        // pmf(k-1) = pmf(k) * k * (1 - beta) / ((n - k + 1) * beta),
        // stopping at the smallest k whose tail is still below threshold.
        let mut k = n;
        let mut pmf = beta.powi(n as i32);
        let mut tail = 0.0f64;
        let mut best = (n + 1) as u32;
        loop {
            tail += pmf;
            if tail >= NR_THRESHOLD {
                break;
            }
            best = k as u32;
            if k == 0 {
                break;
            }
            pmf *= (k as f64) * (1.0 - beta) / ((n - k + 1) as f64 * beta);
            k -= 1;
        }
        best
    }
}
