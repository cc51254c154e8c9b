//! Fixed-effect absorption by alternating projections.
//!
//! Unit and period effects are never expanded into dummy columns. Each
//! dimension is a per-row level index, and absorbing a vector means
//! subtracting level means until every level mean of the residual is zero.
//! With one dimension a single pass is exact; with two, sweeps alternate
//! between dimensions and every second sweep is followed by an Irons–Tuck
//! extrapolation.
//!
//! # References
//!
//! - Gaure (2013), "OLS with multiple high dimensional category variables."
//! - Correia (2017), "Linear Models with High-Dimensional Fixed Effects."
//! - Varadhan & Roland (2008), squared extrapolation for fixed-point maps.

use std::collections::HashMap;

use cp_core::{Error, Result};

/// Level-mean tolerance, relative to the largest absolute input value.
const DEFAULT_TOL: f64 = 1e-11;

const DEFAULT_MAX_ITER: usize = 10_000;

/// One absorbed dimension: dense level per row plus level sizes.
#[derive(Debug, Clone)]
struct Dimension {
    level_of: Vec<usize>,
    sizes: Vec<f64>,
}

impl Dimension {
    /// Densify arbitrary keys in first-appearance order.
    fn from_keys(keys: Vec<usize>) -> Self {
        let mut dense: HashMap<usize, usize> = HashMap::new();
        let mut sizes: Vec<f64> = Vec::new();
        let level_of = keys
            .into_iter()
            .map(|key| {
                let next = dense.len();
                let level = *dense.entry(key).or_insert(next);
                if level == sizes.len() {
                    sizes.push(0.0);
                }
                sizes[level] += 1.0;
                level
            })
            .collect();
        Self { level_of, sizes }
    }

    fn n_levels(&self) -> usize {
        self.sizes.len()
    }

    /// Level means of `v`, written into `means`.
    fn means(&self, v: &[f64], means: &mut Vec<f64>) {
        means.clear();
        means.resize(self.sizes.len(), 0.0);
        for (&level, &x) in self.level_of.iter().zip(v) {
            means[level] += x;
        }
        for (m, &size) in means.iter_mut().zip(&self.sizes) {
            *m /= size;
        }
    }

    fn project(&self, v: &mut [f64], means: &mut Vec<f64>) {
        self.means(v, means);
        for (x, &level) in v.iter_mut().zip(&self.level_of) {
            *x -= means[level];
        }
    }
}

/// Union–find over the levels of two dimensions.
struct DisjointSets {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), size: vec![1; n] }
    }

    fn root(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            let grandparent = self.parent[self.parent[x]];
            self.parent[x] = grandparent;
            x = grandparent;
        }
        x
    }

    fn join(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.root(a), self.root(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }

    fn n_sets(&mut self) -> usize {
        (0..self.parent.len()).filter(|&x| self.root(x) == x).count()
    }
}

/// Outcome of one absorption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Absorption {
    /// Sweeps performed.
    pub iterations: usize,
    /// Whether the tolerance was reached.
    pub converged: bool,
}

/// Absorbs one or more fixed-effect dimensions from row vectors.
///
/// Keys are arbitrary `usize` labels; levels absent from the rows simply do
/// not exist, so they never count towards the absorbed degrees of freedom.
#[derive(Debug, Clone)]
pub struct FixedEffectsSolver {
    n: usize,
    dims: Vec<Dimension>,
    tol: f64,
    max_iter: usize,
}

impl FixedEffectsSolver {
    /// One key vector per dimension, all of the same non-zero length.
    pub fn new(groups: Vec<Vec<usize>>) -> Result<Self> {
        let Some(first) = groups.first() else {
            return Err(Error::Validation("at least one fixed-effect dimension required".into()));
        };
        let n = first.len();
        if n == 0 {
            return Err(Error::Validation("cannot absorb fixed effects from zero rows".into()));
        }
        if let Some((d, g)) = groups.iter().enumerate().find(|(_, g)| g.len() != n) {
            return Err(Error::Validation(format!(
                "fixed-effect dimension {d} has {} keys, expected {n}",
                g.len()
            )));
        }
        let dims = groups.into_iter().map(Dimension::from_keys).collect();
        Ok(Self { n, dims, tol: DEFAULT_TOL, max_iter: DEFAULT_MAX_ITER })
    }

    /// Override the sweep cap.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Levels per dimension.
    pub fn levels(&self) -> Vec<usize> {
        self.dims.iter().map(Dimension::n_levels).collect()
    }

    /// Residual of `v` after absorbing every dimension.
    pub fn partial_out(&self, v: &[f64]) -> Result<Vec<f64>> {
        let mut resid = v.to_vec();
        self.partial_out_in_place(&mut resid)?;
        Ok(resid)
    }

    /// Absorb every dimension from `v` in place.
    pub fn partial_out_in_place(&self, v: &mut [f64]) -> Result<Absorption> {
        if v.len() != self.n {
            return Err(Error::Validation(format!(
                "vector has {} rows, solver has {}",
                v.len(),
                self.n
            )));
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(Error::Validation(
                "cannot absorb fixed effects from non-finite values".into(),
            ));
        }
        let mut means = Vec::new();

        if let [only] = self.dims.as_slice() {
            only.project(v, &mut means);
            return Ok(Absorption { iterations: 1, converged: true });
        }

        let tol = self.tol * v.iter().fold(1.0_f64, |m, x| m.max(x.abs()));
        if self.largest_mean(v, &mut means) < tol {
            return Ok(Absorption { iterations: 0, converged: true });
        }

        let mut start = vec![0.0; self.n];
        let mut once = vec![0.0; self.n];
        let mut iterations = 0;
        while iterations < self.max_iter {
            start.copy_from_slice(v);
            self.sweep(v, &mut means);
            once.copy_from_slice(v);
            self.sweep(v, &mut means);
            iterations += 2;

            if self.largest_mean(v, &mut means) < tol {
                return Ok(Absorption { iterations, converged: true });
            }

            // r = F(x) − x, s = F²(x) − F(x); step along s by (s·(s−r))/|s−r|².
            let (mut num, mut den) = (0.0, 0.0);
            for ((&x0, &x1), &x2) in start.iter().zip(&once).zip(v.iter()) {
                let s = x2 - x1;
                let curvature = s - (x1 - x0);
                num += s * curvature;
                den += curvature * curvature;
            }
            if den > 0.0 && num.is_finite() {
                let step = num / den;
                for (x2, &x1) in v.iter_mut().zip(&once) {
                    *x2 -= step * (*x2 - x1);
                }
            }
        }

        let converged = self.largest_mean(v, &mut means) < tol;
        if !converged {
            log::warn!(
                "fixed-effect absorption stopped after {iterations} sweeps without reaching tol {tol:.1e}"
            );
        }
        Ok(Absorption { iterations, converged })
    }

    /// Parameters absorbed, the common intercept included.
    ///
    /// One dimension absorbs its level count. Two absorb
    /// `levels₀ + levels₁ − components` of the bipartite level graph. More
    /// than two assume a single connected component.
    pub fn degrees_of_freedom_absorbed(&self) -> usize {
        let total: usize = self.dims.iter().map(Dimension::n_levels).sum();
        match self.dims.as_slice() {
            [_] => total,
            [a, b] => {
                let offset = a.n_levels();
                let mut sets = DisjointSets::new(total);
                for (&la, &lb) in a.level_of.iter().zip(&b.level_of) {
                    sets.join(la, offset + lb);
                }
                total - sets.n_sets()
            }
            dims => total.saturating_sub(dims.len() - 1),
        }
    }

    fn sweep(&self, v: &mut [f64], means: &mut Vec<f64>) {
        for dim in &self.dims {
            dim.project(v, means);
        }
    }

    fn largest_mean(&self, v: &[f64], means: &mut Vec<f64>) -> f64 {
        self.dims.iter().fold(0.0_f64, |acc, dim| {
            dim.means(v, means);
            means.iter().fold(acc, |m, x| m.max(x.abs()))
        })
    }
}
