//! Rolling window of raw prices with gap repair.

use crate::error::AllocationError;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Fixed-length rolling buffer of per-instrument prices.
///
/// Holds `2 * window_size + 1` rows so the derived relative-price matrix
/// always has two full, non-overlapping windows of `window_size` rows.
/// Missing observations are stored as `None` and only filled in on read.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    instruments: Vec<String>,
    window_size: usize,
    capacity: usize,
    rows: VecDeque<Vec<Option<f64>>>,
    bars_seen: usize,
}

impl PriceWindow {
    /// Create an empty window over an ordered instrument set.
    pub fn new(instruments: Vec<String>, window_size: usize) -> Self {
        let capacity = 2 * window_size + 1;
        Self {
            instruments,
            window_size,
            capacity,
            rows: VecDeque::with_capacity(capacity),
            bars_seen: 0,
        }
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of raw price rows kept once warmed up.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total bars appended since creation.
    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }

    /// Whether enough rows exist to form two full comparison windows.
    pub fn is_ready(&self) -> bool {
        self.rows.len() >= self.capacity
    }

    /// Push one new row, evicting the oldest once full.
    ///
    /// Instruments absent from `bar`, or with a non-finite or negative price,
    /// are recorded as missing.
    pub fn append(&mut self, bar: &HashMap<String, f64>) {
        let row: Vec<Option<f64>> = self
            .instruments
            .iter()
            .map(|instrument| {
                bar.get(instrument)
                    .copied()
                    .filter(|price| price.is_finite() && *price >= 0.0)
            })
            .collect();

        let missing = row.iter().filter(|p| p.is_none()).count();
        if missing > 0 {
            debug!(missing, "Price row has gaps");
        }

        self.rows.push_back(row);
        while self.rows.len() > self.capacity {
            self.rows.pop_front();
        }
        self.bars_seen += 1;
    }

    /// Price matrix with every gap replaced by linear interpolation.
    ///
    /// Each column is repaired against its own nearest earlier and later
    /// observations; leading and trailing gaps take the first and last
    /// observed value.
    pub fn repaired_matrix(&self) -> Result<Vec<Vec<f64>>, AllocationError> {
        if !self.is_ready() {
            return Err(AllocationError::NotReady {
                seen: self.rows.len(),
                required: self.capacity,
            });
        }

        let mut matrix = vec![vec![0.0; self.instruments.len()]; self.rows.len()];

        for (col, instrument) in self.instruments.iter().enumerate() {
            let column: Vec<Option<f64>> = self.rows.iter().map(|row| row[col]).collect();
            let repaired = interpolate_gaps(&column).ok_or_else(|| {
                AllocationError::InsufficientData {
                    instrument: instrument.clone(),
                    observed: column.iter().filter(|p| p.is_some()).count(),
                }
            })?;

            for (row, value) in repaired.into_iter().enumerate() {
                matrix[row][col] = value;
            }
        }

        Ok(matrix)
    }
}

/// Fill `None` entries by linear interpolation between known neighbours.
///
/// Returns `None` when fewer than two values are known.
pub fn interpolate_gaps(column: &[Option<f64>]) -> Option<Vec<f64>> {
    let known: Vec<(usize, f64)> = column
        .iter()
        .enumerate()
        .filter_map(|(t, value)| value.map(|v| (t, v)))
        .collect();

    if known.len() < 2 {
        return None;
    }

    let (first_t, first_v) = known[0];
    let (last_t, last_v) = known[known.len() - 1];

    let mut repaired = Vec::with_capacity(column.len());
    let mut next = 0;

    for (t, value) in column.iter().enumerate() {
        if let Some(v) = value {
            repaired.push(*v);
            continue;
        }
        if t < first_t {
            repaired.push(first_v);
            continue;
        }
        if t > last_t {
            repaired.push(last_v);
            continue;
        }

        while known[next + 1].0 < t {
            next += 1;
        }
        let (t0, a) = known[next];
        let (t1, b) = known[next + 1];
        repaired.push(a + (b - a) * (t - t0) as f64 / (t1 - t0) as f64);
    }

    Some(repaired)
}

/// Relative prices: `out[t][i] = prices[t + 1][i] / prices[t][i]`.
///
/// A zero previous price yields 1.0 (no information) instead of dividing.
pub fn relative_prices(prices: &[Vec<f64>]) -> Vec<Vec<f64>> {
    prices
        .windows(2)
        .map(|pair| {
            pair[1]
                .iter()
                .zip(pair[0].iter())
                .map(|(&now, &prev)| if prev > 0.0 { now / prev } else { 1.0 })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(prices: &[(&str, f64)]) -> HashMap<String, f64> {
        prices.iter().map(|(s, p)| (s.to_string(), *p)).collect()
    }

    fn instruments() -> Vec<String> {
        vec!["AAA".to_string(), "BBB".to_string()]
    }

    #[test]
    fn test_not_ready_during_warm_up() {
        let mut window = PriceWindow::new(instruments(), 2);
        for i in 0..4 {
            window.append(&bar(&[("AAA", 10.0 + i as f64), ("BBB", 20.0)]));
        }

        assert!(!window.is_ready());
        assert_eq!(
            window.repaired_matrix(),
            Err(AllocationError::NotReady { seen: 4, required: 5 })
        );
    }

    #[test]
    fn test_evicts_oldest_row() {
        let mut window = PriceWindow::new(instruments(), 2);
        for i in 0..8 {
            window.append(&bar(&[("AAA", i as f64 + 1.0), ("BBB", 20.0)]));
        }

        assert_eq!(window.len(), window.capacity());
        assert_eq!(window.bars_seen(), 8);

        let matrix = window.repaired_matrix().unwrap();
        assert_eq!(matrix.len(), 5);
        assert_eq!(matrix[0][0], 4.0);
        assert_eq!(matrix[4][0], 8.0);
    }

    #[test]
    fn test_interior_gap_is_linear() {
        let column = vec![Some(10.0), None, None, Some(16.0)];
        let repaired = interpolate_gaps(&column).unwrap();

        // a + (b - a) * (t - t0) / (t1 - t0)
        assert_eq!(repaired, vec![10.0, 12.0, 14.0, 16.0]);
    }

    #[test]
    fn test_single_interior_gap() {
        let column = vec![Some(3.0), Some(5.0), None, Some(9.0), Some(1.0)];
        let repaired = interpolate_gaps(&column).unwrap();
        assert_eq!(repaired[2], 5.0 + (9.0 - 5.0) * 1.0 / 2.0);
    }

    #[test]
    fn test_edge_gaps_take_nearest_observation() {
        let column = vec![None, Some(4.0), None, Some(8.0), None];
        let repaired = interpolate_gaps(&column).unwrap();
        assert_eq!(repaired, vec![4.0, 4.0, 6.0, 8.0, 8.0]);
    }

    #[test]
    fn test_too_few_observations() {
        assert!(interpolate_gaps(&[None, Some(1.0), None]).is_none());

        let mut window = PriceWindow::new(instruments(), 2);
        for i in 0..5 {
            if i == 2 {
                window.append(&bar(&[("AAA", 10.0), ("BBB", 20.0)]));
            } else {
                window.append(&bar(&[("AAA", 10.0)]));
            }
        }

        match window.repaired_matrix() {
            Err(AllocationError::InsufficientData { instrument, observed }) => {
                assert_eq!(instrument, "BBB");
                assert_eq!(observed, 1);
            }
            other => panic!("Expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_prices_are_missing() {
        let mut window = PriceWindow::new(instruments(), 1);
        window.append(&bar(&[("AAA", 10.0), ("BBB", 2.0)]));
        window.append(&bar(&[("AAA", f64::NAN), ("BBB", -1.0)]));
        window.append(&bar(&[("AAA", 14.0), ("BBB", 4.0)]));

        let matrix = window.repaired_matrix().unwrap();
        assert_eq!(matrix[1], vec![12.0, 3.0]);
    }

    #[test]
    fn test_relative_prices_guard_zero() {
        let prices = vec![vec![10.0, 0.0], vec![11.0, 5.0], vec![22.0, 5.0]];
        let relative = relative_prices(&prices);

        assert_eq!(relative.len(), 2);
        assert!((relative[0][0] - 1.1).abs() < 1e-12);
        assert_eq!(relative[0][1], 1.0);
        assert_eq!(relative[1], vec![2.0, 1.0]);
    }
}
