//! Reconstruction of a series from a compression result
//!
//! Each encoded block expands to `length` values per dimension copied from
//! its template. A template shorter than its block is extended by holding
//! its last value; a dimension the template does not carry reconstructs as
//! NaN, the same as a sample that lacked it.

use crate::error::{CompressionError, Result};
use crate::result::CompressionResult;
use crate::similarity;
use crate::types::{SeriesColumns, Window, FLAT_DIMENSION};
use std::collections::BTreeMap;
use tracing::debug;

/// Reconstructed columns, one value per input sample
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    columns: BTreeMap<String, Vec<f64>>,
    len: usize,
}

impl Reconstruction {
    /// Number of reconstructed samples
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing was reconstructed
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reconstructed dimension names
    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// The single column of a flat result (the first column otherwise)
    pub fn flat(&self) -> Option<&[f64]> {
        self.columns.values().next().map(Vec::as_slice)
    }

    /// Column of a named dimension
    pub fn dimension(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Mean relative error against the original input
    ///
    /// Uses the CER rule: `|original - reconstructed| / |original|` averaged
    /// over positions where the original value is present and nonzero.
    /// Returns 0.0 when no position qualifies.
    pub fn reconstruction_error(&self, original: &SeriesColumns) -> f64 {
        let mut total = 0.0;
        let mut count = 0usize;
        for (name, rebuilt) in &self.columns {
            let Some(column) = original.column(name) else {
                continue;
            };
            let (pairs_a, pairs_b): (Vec<f64>, Vec<f64>) = column
                .iter()
                .zip(rebuilt)
                .filter_map(|(o, r)| o.filter(|_| r.is_finite()).map(|o| (o, *r)))
                .unzip();
            let nonzero = pairs_a.iter().filter(|v| **v != 0.0).count();
            if let Some(cer) = similarity::cer(&pairs_a, &pairs_b) {
                total += cer * nonzero as f64;
                count += nonzero;
            }
        }
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }
}

/// Rebuild the series encoded by `result`
///
/// Fails with [`CompressionError::MissingTemplate`] when a block references a
/// template the result does not carry.
pub fn reconstruct(result: &CompressionResult) -> Result<Reconstruction> {
    let names: Vec<String> = if result.dimensions.is_empty() {
        vec![FLAT_DIMENSION.to_string()]
    } else {
        result.dimensions.clone()
    };
    let mut columns: BTreeMap<String, Vec<f64>> = names
        .iter()
        .map(|name| (name.clone(), Vec::with_capacity(result.total_values)))
        .collect();

    for block in &result.encoded_stream {
        let template = result
            .templates
            .get(&block.template_id)
            .ok_or(CompressionError::MissingTemplate(block.template_id))?;

        for (name, column) in columns.iter_mut() {
            let values = match template {
                Window::Flat(values) => Some(values.as_slice()),
                Window::Multi(dims) => dims.get(name).map(Vec::as_slice),
            };
            extend_held(column, values.unwrap_or(&[]), block.length);
        }
    }

    let len = result.encoded_stream.last().map_or(0, |b| b.end_index());
    debug!(
        blocks = result.encoded_stream.len(),
        samples = len,
        dimensions = columns.len(),
        "Reconstructed series"
    );
    Ok(Reconstruction { columns, len })
}

/// Append `length` values from `values`, holding the last one past its end
fn extend_held(column: &mut Vec<f64>, values: &[f64], length: usize) {
    let held = values.last().copied().unwrap_or(f64::NAN);
    column.extend((0..length).map(|i| values.get(i).copied().unwrap_or(held)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::EncodedBlock;

    fn result_with(templates: Vec<(u64, Window)>, blocks: Vec<(u64, usize, usize)>) -> CompressionResult {
        let total = blocks.iter().map(|b| b.2).sum();
        let mut result = CompressionResult::empty(total, vec!["power".into()], false, 1, 100);
        result.templates = templates.into_iter().collect();
        result.encoded_stream = blocks
            .into_iter()
            .map(|(template_id, start_index, length)| EncodedBlock {
                template_id,
                start_index,
                length,
            })
            .collect();
        result.blocks_processed = result.encoded_stream.len();
        result
    }

    #[test]
    fn test_reconstruct_flat() {
        let result = result_with(
            vec![(1, Window::Flat(vec![1.0, 2.0, 3.0])), (2, Window::Flat(vec![9.0, 8.0]))],
            vec![(1, 0, 3), (2, 3, 2), (1, 5, 3)],
        );
        let rebuilt = reconstruct(&result).unwrap();
        assert_eq!(rebuilt.len(), 8);
        assert_eq!(
            rebuilt.flat().unwrap(),
            &[1.0, 2.0, 3.0, 9.0, 8.0, 1.0, 2.0, 3.0]
        );
        assert_eq!(rebuilt.dimension("power"), rebuilt.flat());
    }

    #[test]
    fn test_short_template_holds_last_value() {
        let result = result_with(vec![(1, Window::Flat(vec![4.0, 5.0]))], vec![(1, 0, 5)]);
        let rebuilt = reconstruct(&result).unwrap();
        assert_eq!(rebuilt.flat().unwrap(), &[4.0, 5.0, 5.0, 5.0, 5.0]);
    }

    #[test]
    fn test_missing_template_is_error() {
        let result = result_with(vec![(1, Window::Flat(vec![1.0]))], vec![(2, 0, 1)]);
        let err = reconstruct(&result).unwrap_err();
        assert!(err.to_string().contains("Missing template 2"));
    }

    #[test]
    fn test_reconstruct_multi() {
        let mut dims = BTreeMap::new();
        dims.insert("a".to_string(), vec![1.0, 2.0]);
        let mut result = result_with(vec![(1, Window::Multi(dims))], vec![(1, 0, 2), (1, 2, 2)]);
        result.dimensions = vec!["a".into(), "b".into()];

        let rebuilt = reconstruct(&result).unwrap();
        assert_eq!(rebuilt.dimension("a").unwrap(), &[1.0, 2.0, 1.0, 2.0]);
        assert!(rebuilt.dimension("b").unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_reconstruction_error() {
        let result = result_with(vec![(1, Window::Flat(vec![10.0, 20.0]))], vec![(1, 0, 2), (1, 2, 2)]);
        let rebuilt = reconstruct(&result).unwrap();

        let exact = SeriesColumns::from_values("power", &[10.0, 20.0, 10.0, 20.0]);
        assert_eq!(rebuilt.reconstruction_error(&exact), 0.0);

        // 10 vs 8 -> 0.25, 20 vs 20 -> 0, twice
        let shifted = SeriesColumns::from_values("power", &[8.0, 20.0, 8.0, 20.0]);
        assert!((rebuilt.reconstruction_error(&shifted) - 0.125).abs() < 1e-12);
    }
}
