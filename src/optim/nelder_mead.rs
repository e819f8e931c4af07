//! Classical Nelder-Mead simplex minimization.
//!
//! Why a simplex search?
//! - each objective evaluation here is a full pass over the alignment cache,
//!   so the evaluation budget is the binding constraint
//! - the objective surface is smooth on the cache but has no analytically
//!   available gradient
//!
//! Coefficients are the classical ones: reflect 1.0, expand 2.0, contract
//! 0.5, shrink 0.5. Convergence is declared when the simplex diameter (max
//! pairwise vertex distance) falls below the configured threshold.

/// Minimization objective. Implemented for closures, and by the
/// hyperparameter objective which mutates its cache per evaluation.
pub trait ObjectiveFn {
    fn eval(&mut self, x: &[f64]) -> f64;
}

impl<F: FnMut(&[f64]) -> f64> ObjectiveFn for F {
    fn eval(&mut self, x: &[f64]) -> f64 {
        self(x)
    }
}

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

struct Simplex {
    verts: Vec<Vec<f64>>,
    vals: Vec<f64>,
}

impl Simplex {
    /// Initial point plus one vertex offset by `step` along each axis.
    fn new(obj: &mut dyn ObjectiveFn, initial: &[f64], step: f64) -> Self {
        let n = initial.len();
        let mut verts = Vec::with_capacity(n + 1);
        verts.push(initial.to_vec());
        for d in 0..n {
            let mut v = initial.to_vec();
            v[d] += step;
            verts.push(v);
        }
        let vals = verts.iter().map(|v| obj.eval(v)).collect();
        Self { verts, vals }
    }

    fn best(&self) -> usize {
        let mut b = 0;
        for i in 1..self.vals.len() {
            if self.vals[i] < self.vals[b] {
                b = i;
            }
        }
        b
    }

    fn worst(&self) -> usize {
        let mut w = 0;
        for i in 1..self.vals.len() {
            if self.vals[i] > self.vals[w] {
                w = i;
            }
        }
        w
    }

    /// Largest value among the vertices other than `worst`.
    fn second_worst_val(&self, worst: usize) -> f64 {
        let mut v = f64::MIN;
        for i in 0..self.vals.len() {
            if i != worst && self.vals[i] > v {
                v = self.vals[i];
            }
        }
        v
    }

    fn centroid_excluding(&self, skip: usize) -> Vec<f64> {
        let n = self.verts[0].len();
        let mut c = vec![0.0; n];
        for (i, v) in self.verts.iter().enumerate() {
            if i == skip {
                continue;
            }
            for d in 0..n {
                c[d] += v[d];
            }
        }
        let m = (self.verts.len() - 1) as f64;
        for cd in &mut c {
            *cd /= m;
        }
        c
    }

    fn diameter(&self) -> f64 {
        let mut max = 0.0f64;
        for i in 0..self.verts.len() {
            for j in (i + 1)..self.verts.len() {
                let d: f64 = self.verts[i]
                    .iter()
                    .zip(&self.verts[j])
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                max = max.max(d);
            }
        }
        max
    }

    /// Pull every vertex halfway toward the best one.
    fn shrink(&mut self, obj: &mut dyn ObjectiveFn) {
        let best = self.best();
        let anchor = self.verts[best].clone();
        for i in 0..self.verts.len() {
            if i == best {
                continue;
            }
            for d in 0..anchor.len() {
                self.verts[i][d] = anchor[d] + SHRINK * (self.verts[i][d] - anchor[d]);
            }
            self.vals[i] = obj.eval(&self.verts[i]);
        }
    }
}

/// Minimize `obj` starting from `initial`.
///
/// Returns the best vertex and its objective value once the simplex diameter
/// drops below `conv` or `max_iters` iterations have run.
pub fn optimize(
    obj: &mut dyn ObjectiveFn,
    initial: &[f64],
    init_step: f64,
    conv: f64,
    max_iters: usize,
) -> (Vec<f64>, f64) {
    let n = initial.len();
    let mut sx = Simplex::new(obj, initial, init_step);

    for _ in 0..max_iters {
        if sx.diameter() < conv {
            break;
        }

        let worst = sx.worst();
        let second_worst_val = sx.second_worst_val(worst);
        let best_val = sx.vals[sx.best()];
        let centroid = sx.centroid_excluding(worst);
        let worst_vert = sx.verts[worst].clone();

        let point_at = |coef: f64| -> Vec<f64> {
            (0..n)
                .map(|d| centroid[d] + coef * (centroid[d] - worst_vert[d]))
                .collect()
        };

        let reflected = point_at(REFLECT);
        let fr = obj.eval(&reflected);

        if fr < best_val {
            let expanded = point_at(EXPAND);
            let fe = obj.eval(&expanded);
            if fe < fr {
                sx.verts[worst] = expanded;
                sx.vals[worst] = fe;
            } else {
                sx.verts[worst] = reflected;
                sx.vals[worst] = fr;
            }
        } else if fr < second_worst_val {
            sx.verts[worst] = reflected;
            sx.vals[worst] = fr;
        } else {
            let contracted = point_at(-CONTRACT);
            let fc = obj.eval(&contracted);
            if fc < sx.vals[worst] {
                sx.verts[worst] = contracted;
                sx.vals[worst] = fc;
            } else {
                sx.shrink(obj);
            }
        }
    }

    let best = sx.best();
    (sx.verts[best].clone(), sx.vals[best])
}
