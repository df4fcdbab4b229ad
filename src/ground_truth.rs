use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{MotionError, Result};

/// Column of the FOE x coordinate in the recorded ground-truth files.
pub const DEFAULT_FOE_X_COLUMN: usize = 22;
/// Column of the FOE y coordinate in the recorded ground-truth files.
pub const DEFAULT_FOE_Y_COLUMN: usize = 23;

/// Time-indexed reference FOE positions.
///
/// Times are in seconds and must be ascending. Lookups return the entry
/// closest to the query, or the boundary entry outside the recorded range.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroundTruth {
    time_s: Vec<f64>,
    foe_x: Vec<f32>,
    foe_y: Vec<f32>,
}

impl GroundTruth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sample. Samples must be pushed in ascending time.
    pub fn push(&mut self, time_s: f64, foe_x: f32, foe_y: f32) {
        self.time_s.push(time_s);
        self.foe_x.push(foe_x);
        self.foe_y.push(foe_y);
    }

    /// Parse whitespace-separated rows: time in column 0, FOE in `x_col` / `y_col`.
    ///
    /// Rows whose first field is `#` and blank rows are skipped.
    pub fn from_reader<R: BufRead>(reader: R, x_col: usize, y_col: usize) -> Result<Self> {
        let mut gt = GroundTruth::new();
        let mut skipped = 0usize;
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let cols: Vec<&str> = line.split_whitespace().collect();
            match cols.first() {
                None => continue,
                Some(&"#") => {
                    skipped += 1;
                    continue;
                }
                Some(_) => {}
            }
            let parse = |col: usize| -> Result<f64> {
                let raw = cols.get(col).ok_or_else(|| MotionError::Parse {
                    line: idx + 1,
                    reason: format!("missing column {}", col),
                })?;
                raw.parse::<f64>().map_err(|_| MotionError::Parse {
                    line: idx + 1,
                    reason: format!("column {} is not a number: {:?}", col, raw),
                })
            };
            let t = parse(0)?;
            if let Some(&last) = gt.time_s.last() {
                if t < last {
                    return Err(MotionError::Parse {
                        line: idx + 1,
                        reason: format!("time {} precedes previous sample {}", t, last),
                    });
                }
            }
            gt.push(t, parse(x_col)? as f32, parse(y_col)? as f32);
        }
        debug!(skipped, "comment lines skipped in ground truth");
        Ok(gt)
    }

    /// Load a ground-truth file using the default FOE columns.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let gt = Self::from_reader(
            BufReader::new(File::open(path)?),
            DEFAULT_FOE_X_COLUMN,
            DEFAULT_FOE_Y_COLUMN,
        )?;
        if let (Some(first), Some(last)) = (gt.time_s.first(), gt.time_s.last()) {
            info!(
                path = %path.display(),
                samples = gt.len(),
                from_s = first,
                to_s = last,
                "ground truth imported"
            );
        }
        Ok(gt)
    }

    pub fn len(&self) -> usize {
        self.time_s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_s.is_empty()
    }

    /// Index of the sample nearest to `time_s`; 0 when no data is loaded.
    pub fn nearest_index(&self, time_s: f64) -> usize {
        let n = self.time_s.len();
        if n == 0 || time_s <= self.time_s[0] {
            return 0;
        }
        if time_s >= self.time_s[n - 1] {
            return n - 1;
        }
        // First index with time >= query; 1..n-1 given the checks above.
        let hi = self.time_s.partition_point(|&t| t < time_s);
        if self.time_s[hi] == time_s {
            return hi;
        }
        let lo = hi - 1;
        if self.time_s[hi] - time_s < time_s - self.time_s[lo] {
            hi
        } else {
            lo
        }
    }

    /// Reference FOE at `time_s`, or `None` when no data is loaded.
    pub fn foe_at(&self, time_s: f64) -> Option<(f32, f32)> {
        if self.is_empty() {
            return None;
        }
        let i = self.nearest_index(time_s);
        Some((self.foe_x[i], self.foe_y[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GroundTruth {
        let mut gt = GroundTruth::new();
        gt.push(0.0, 10.0, 20.0);
        gt.push(1.0, 11.0, 21.0);
        gt.push(2.0, 12.0, 22.0);
        gt
    }

    #[test]
    fn test_empty_lookup() {
        let gt = GroundTruth::new();
        assert_eq!(gt.nearest_index(5.0), 0);
        assert!(gt.foe_at(5.0).is_none());
    }

    #[test]
    fn test_boundaries() {
        let gt = sample();
        assert_eq!(gt.nearest_index(-1.0), 0);
        assert_eq!(gt.nearest_index(9.0), 2);
        assert_eq!(gt.foe_at(9.0), Some((12.0, 22.0)));
    }

    #[test]
    fn test_exact_and_nearest() {
        let gt = sample();
        assert_eq!(gt.nearest_index(1.0), 1);
        assert_eq!(gt.nearest_index(1.3), 1);
        assert_eq!(gt.nearest_index(1.7), 2);
        // Equidistant resolves to the earlier sample.
        assert_eq!(gt.nearest_index(0.5), 0);
    }

    fn row(t: f64, x: f64, y: f64) -> String {
        let mut cols = vec!["0".to_string(); 24];
        cols[0] = t.to_string();
        cols[22] = x.to_string();
        cols[23] = y.to_string();
        cols.join(" ")
    }

    #[test]
    fn test_from_reader() {
        let text = format!(
            "# time ... foeX foeY\n{}\n\n{}\n",
            row(0.5, 30.0, 40.0),
            row(1.5, 31.0, 41.0)
        );
        let gt = GroundTruth::from_reader(
            text.as_bytes(),
            DEFAULT_FOE_X_COLUMN,
            DEFAULT_FOE_Y_COLUMN,
        )
        .unwrap();
        assert_eq!(gt.len(), 2);
        assert_eq!(gt.foe_at(1.4), Some((31.0, 41.0)));
    }

    #[test]
    fn test_from_reader_custom_columns() {
        let gt = GroundTruth::from_reader("0.0 5 6\n1.0 7 8\n".as_bytes(), 1, 2).unwrap();
        assert_eq!(gt.foe_at(0.9), Some((7.0, 8.0)));
    }

    #[test]
    fn test_from_reader_errors() {
        let short = GroundTruth::from_reader("0.0 5\n".as_bytes(), 1, 2);
        assert!(matches!(short, Err(MotionError::Parse { line: 1, .. })));
        let bad = GroundTruth::from_reader("0.0 5 x\n".as_bytes(), 1, 2);
        assert!(bad.is_err());
        let unordered = GroundTruth::from_reader("1.0 5 6\n0.5 5 6\n".as_bytes(), 1, 2);
        assert!(matches!(unordered, Err(MotionError::Parse { line: 2, .. })));
    }
}
