//! Language rebalancing by weighted sampling without replacement.

use crate::error::{DataError, DataResult};
use crate::record::MetadataRow;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceOptions {
    /// Rows to draw from the weighted (non-exempt) languages.
    pub sample_size: usize,
    /// Languages kept in full and excluded from the draw.
    pub exempt_languages: Vec<String>,
}

impl Default for RebalanceOptions {
    fn default() -> Self {
        Self { sample_size: 150_000, exempt_languages: vec!["ha".to_string(), "af".to_string()] }
    }
}

/// Assign per-row weights: `1 / k` for the `k` distinct non-exempt languages present,
/// `0` for exempt languages.
pub fn assign_weights(rows: &mut [MetadataRow], exempt: &[String]) {
    let weighted: BTreeSet<&str> = rows
        .iter()
        .map(|r| r.language.as_str())
        .filter(|l| !exempt.iter().any(|e| e == l))
        .collect();
    let weight = if weighted.is_empty() { 0.0 } else { 1.0 / weighted.len() as f64 };

    for row in rows.iter_mut() {
        row.weight = if exempt.iter().any(|e| *e == row.language) { 0.0 } else { weight };
    }
}

/// Draw `n` indices without replacement with probability proportional to `weights`.
///
/// Uses Efraimidis–Spirakis keys `u^(1/w)`; the result is ordered by descending key,
/// which is the order the items would be drawn in sequentially.
pub fn weighted_sample_indices<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> DataResult<Vec<usize>> {
    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(DataError::Sampling(format!("weights must be finite and non-negative, got {bad}")));
    }

    let eligible = weights.iter().filter(|w| **w > 0.0).count();
    if eligible < n {
        return Err(DataError::Sampling(format!(
            "cannot draw {n} rows without replacement: only {eligible} rows have non-zero weight"
        )));
    }

    let mut keyed: Vec<(f64, usize)> = weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0.0)
        .map(|(idx, w)| {
            let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
            (u.ln() / w, idx)
        })
        .collect();

    // ln(u)/w is monotone in u^(1/w) and avoids underflow for small weights.
    keyed.sort_unstable_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    keyed.truncate(n);
    Ok(keyed.into_iter().map(|(_, idx)| idx).collect())
}

/// Weight rows, draw the sample, then append every exempt-language row.
pub fn rebalance<R: Rng + ?Sized>(
    mut rows: Vec<MetadataRow>,
    options: &RebalanceOptions,
    rng: &mut R,
) -> DataResult<Vec<MetadataRow>> {
    assign_weights(&mut rows, &options.exempt_languages);

    let weights: Vec<f64> = rows.iter().map(|r| r.weight).collect();
    let picked = weighted_sample_indices(&weights, options.sample_size, rng)?;

    let mut out: Vec<MetadataRow> = picked.iter().map(|&idx| rows[idx].clone()).collect();
    out.extend(rows.into_iter().filter(|r| options.exempt_languages.iter().any(|e| *e == r.language)));

    tracing::info!("Reduced data length: {}", out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn row(id: i64, language: &str) -> MetadataRow {
        MetadataRow {
            id,
            file_name: format!("{id}.jpg"),
            language: language.to_string(),
            caption: format!("caption {id} {language}"),
            question: "q".to_string(),
            weight: 0.0,
        }
    }

    #[test]
    fn test_assign_weights_excludes_exempt_languages() {
        let mut rows = vec![row(0, "en"), row(1, "fr"), row(2, "ha"), row(3, "af"), row(4, "en")];
        assign_weights(&mut rows, &["ha".to_string(), "af".to_string()]);
        let weights: Vec<f64> = rows.iter().map(|r| r.weight).collect();
        assert_eq!(weights, vec![0.5, 0.5, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_weighted_sample_has_no_repeats_and_skips_zero_weights() {
        let mut rng = StdRng::seed_from_u64(11);
        let weights = vec![1.0, 0.0, 2.0, 1.0, 0.0, 5.0];
        let picked = weighted_sample_indices(&weights, 4, &mut rng).unwrap();
        assert_eq!(picked.len(), 4);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 4);
        assert!(!picked.contains(&1));
        assert!(!picked.contains(&4));
    }

    #[test]
    fn test_weighted_sample_rejects_shortfall() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = weighted_sample_indices(&[1.0, 0.0], 2, &mut rng).unwrap_err();
        assert!(matches!(err, DataError::Sampling(_)));
    }

    #[test]
    fn test_weighted_sample_favours_heavier_items() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut heavy_first = 0;
        for _ in 0..500 {
            let picked = weighted_sample_indices(&[1.0, 9.0], 1, &mut rng).unwrap();
            if picked[0] == 1 {
                heavy_first += 1;
            }
        }
        assert!(heavy_first > 400, "heavy item drawn {heavy_first}/500 times");
    }

    #[test]
    fn test_rebalance_samples_then_appends_exempt_rows() {
        let rows: Vec<MetadataRow> = (0..10)
            .map(|i| row(i, "en"))
            .chain((10..14).map(|i| row(i, "fr")))
            .chain((14..16).map(|i| row(i, "ha")))
            .chain((16..17).map(|i| row(i, "af")))
            .collect();

        let options = RebalanceOptions { sample_size: 5, ..RebalanceOptions::default() };
        let mut rng = StdRng::seed_from_u64(5);
        let out = rebalance(rows, &options, &mut rng).unwrap();

        assert_eq!(out.len(), 5 + 3);
        assert!(out[..5].iter().all(|r| r.language == "en" || r.language == "fr"));
        assert!(out[..5].iter().all(|r| (r.weight - 0.5).abs() < f64::EPSILON));
        let tail: Vec<i64> = out[5..].iter().map(|r| r.id).collect();
        assert_eq!(tail, vec![14, 15, 16]);
    }

    #[test]
    fn test_rebalance_is_deterministic_for_a_seed() {
        let rows: Vec<MetadataRow> = (0..50).map(|i| row(i, if i % 2 == 0 { "en" } else { "sw" })).collect();
        let options = RebalanceOptions { sample_size: 10, ..RebalanceOptions::default() };

        let a = rebalance(rows.clone(), &options, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = rebalance(rows, &options, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }
}
