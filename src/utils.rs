//! Finite-difference checks for derivatives, used by the operator and cost
//! tests.

use std::ops::Range;

use anyhow::{Error, Result};
use ndarray::prelude::*;

use crate::ops::{NodeData, Operator};

const EPSILON: f64 = 1e-6;

type Forward<'a> = dyn FnMut(&[f64]) -> Result<Vec<f64>> + 'a;

/// `[outputs, inputs]` matrix of central differences of `f` around `x`.
fn numeric_jacobian(x: &[f64], f: &mut Forward<'_>) -> Result<Array2<f64>> {
    let rows = f(x)?.len();
    let mut x = x.to_vec();
    let mut jac = Array2::zeros((rows, x.len()));
    for j in 0..x.len() {
        let at = x[j];
        x[j] = at + EPSILON;
        let up = f(&x)?;
        x[j] = at - EPSILON;
        let down = f(&x)?;
        x[j] = at;
        for (d, (u, l)) in jac.column_mut(j).iter_mut().zip(up.iter().zip(&down)) {
            *d = (u - l) / (2.0 * EPSILON);
        }
    }
    Ok(jac)
}

/// Feeds every unit output gradient through `pullback` and compares the
/// result with the matching row of `jac`.
fn compare_rows(jac: &Array2<f64>, pullback: &mut Forward<'_>) -> Result<()> {
    let (rows, cols) = jac.dim();
    let mut grad = vec![0.0; rows];
    for k in 0..rows {
        grad[k] = 1.0;
        let got = pullback(&grad)?;
        grad[k] = 0.0;
        if got.len() != cols {
            return Err(Error::msg(format!("pullback gave {} entries for {cols} inputs", got.len())));
        }
        let want = jac.row(k).to_vec();
        if !is_close(&got, &want, None, None) {
            return Err(Error::msg(format!(
                "derivative of output {k} is off\n finite differences: {want:?}\n analytic: {got:?}"
            )));
        }
    }
    Ok(())
}

/// Checks that `pullback(g)` is `g · J`, with `J` the Jacobian of `f` at `x`.
pub fn check_pullback(
    x: &[f64],
    mut f: impl FnMut(&[f64]) -> Vec<f64>,
    mut pullback: impl FnMut(&[f64]) -> Vec<f64>,
) -> Result<()> {
    let jac = numeric_jacobian(x, &mut |x: &[f64]| -> Result<Vec<f64>> { Ok(f(x)) })?;
    compare_rows(&jac, &mut |g: &[f64]| -> Result<Vec<f64>> { Ok(pullback(g)) })
}

/// Checks `op.input_deltas` against finite differences of `op.evaluate` at
/// `inputs`. `ranges` splits the flat inputs the way separate input nodes
/// would, and each is queried on its own.
pub fn check_input_deltas(
    op: &mut dyn Operator,
    inputs: &[f64],
    size: usize,
    ranges: &[Range<usize>],
) -> Result<()> {
    let mut forward = |x: &[f64]| -> Result<Vec<f64>> {
        let mut values = vec![0.0; size];
        op.evaluate(x, &mut values)?;
        Ok(values)
    };
    let values = forward(inputs)?;
    let jac = numeric_jacobian(inputs, &mut forward)?;

    let op = &*op;
    compare_rows(&jac, &mut |deltas: &[f64]| -> Result<Vec<f64>> {
        let data = NodeData { inputs, values: &values, deltas };
        let mut acc = vec![0.0; inputs.len()];
        for range in ranges {
            let mut outside = None;
            op.input_deltas(data, range.start, range.end, &mut |i: usize, v: f64| {
                match acc.get_mut(range.start + i).filter(|_| range.start + i < range.end) {
                    Some(slot) => *slot += v,
                    None => {
                        outside.get_or_insert(i);
                    }
                }
            })?;
            if let Some(i) = outside {
                return Err(Error::msg(format!("local index {i} is outside input range {range:?}")));
            }
        }
        Ok(acc)
    })
}

/// |a - b| <= atol + rtol * |b| elementwise
pub fn is_close(a: &[f64], b: &[f64], atol: Option<f64>, rtol: Option<f64>) -> bool {
    let atol = atol.unwrap_or(1e-5);
    let rtol = rtol.unwrap_or(0.001);
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(a, b)| (a - b).abs() <= atol + rtol * b.abs())
}
