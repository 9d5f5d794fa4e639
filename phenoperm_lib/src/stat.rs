struct Carrier {
    p: f64,
    original_order: usize,
}

#[derive(Clone, Copy, Debug)]
pub enum AdjustmentMethod {
    BH,
    None,
}

pub fn adjust(p_vals: &[f64], method: AdjustmentMethod) -> Vec<f64> {
    match method {
        AdjustmentMethod::BH => benjamini_hochberg(p_vals),
        AdjustmentMethod::None => p_vals.to_vec(),
    }
}

/// Benjamini–Hochberg step-up q-values. NaN inputs stay NaN and do not count
/// towards the family size.
fn benjamini_hochberg(p_vals: &[f64]) -> Vec<f64> {
    let mut carriers: Vec<Carrier> = p_vals
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .map(|(i, p)| Carrier {
            p: *p,
            original_order: i,
        })
        .collect();
    carriers.sort_by(|a, b| a.p.total_cmp(&b.p));
    let m = carriers.len();
    let mut fdr_vals = vec![f64::NAN; p_vals.len()];
    let mut prev_fdr = 1.0;
    for (i, carrier) in carriers.iter().enumerate().rev() {
        let mut fdr = carrier.p * m as f64 / (i + 1) as f64;
        if fdr > 1.0 {
            fdr = 1.0;
        }
        if fdr > prev_fdr {
            fdr = prev_fdr;
        } else {
            prev_fdr = fdr;
        }
        fdr_vals[carrier.original_order] = fdr;
    }
    fdr_vals
}

/// One-sided, Laplace-smoothed empirical p-value of `observed` against `null`.
///
/// Negative scores count null values strictly below, non-negative scores
/// count null values strictly above. The denominator is `pool_size + 1`
/// regardless of how many null values there are.
pub fn empirical_p<I>(observed: f64, null: I, pool_size: usize) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let extreme = if observed < 0.0 {
        null.into_iter().filter(|&d| d < observed).count()
    } else {
        null.into_iter().filter(|&d| d > observed).count()
    };
    ((extreme + 1) as f64 / (pool_size + 1) as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use statrs::assert_almost_eq;

    #[test]
    fn bh_matches_step_up() {
        let q = adjust(&[0.01, 0.04, 0.03, 0.005], AdjustmentMethod::BH);
        assert_almost_eq!(q[0], 0.02, 1e-12);
        assert_almost_eq!(q[1], 0.04, 1e-12);
        assert_almost_eq!(q[2], 0.04, 1e-12);
        assert_almost_eq!(q[3], 0.02, 1e-12);
    }

    #[test]
    fn bh_skips_nan() {
        let q = adjust(&[0.01, f64::NAN, 0.02], AdjustmentMethod::BH);
        assert!(q[1].is_nan());
        assert_almost_eq!(q[0], 0.02, 1e-12);
        assert_almost_eq!(q[2], 0.02, 1e-12);
    }

    #[test]
    fn empirical_p_direction() {
        let null = vec![-3.0, -1.0, 0.5, 2.5, 3.0];
        let upper = empirical_p(2.0, null.iter().copied(), 5);
        let lower = empirical_p(-2.0, null.iter().copied(), 5);
        let beyond = empirical_p(4.0, null, 5);
        assert_almost_eq!(upper, 3.0 / 6.0, 1e-12);
        assert_almost_eq!(lower, 2.0 / 6.0, 1e-12);
        assert_almost_eq!(beyond, 1.0 / 6.0, 1e-12);
    }
}
