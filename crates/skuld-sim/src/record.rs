//! The measurement record: the growing log of classical measurement results.

use crate::error::{SimError, SimResult};
use crate::writer::RecordWriter;

/// A monotonically appended bit log with lookback addressing, plus a write
/// cursor tracking how many results have been flushed to an external writer.
#[derive(Debug, Clone, Default)]
pub struct MeasureRecord {
    /// All recorded results, oldest first.
    pub storage: Vec<bool>,
    written: usize,
}

impl MeasureRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded results.
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Appends one result.
    #[inline]
    pub fn record_result(&mut self, result: bool) {
        self.storage.push(result);
    }

    /// The `lookback`-from-the-end result (`lookback = 1` is the most
    /// recent). Reading past the beginning of the log is a hard error.
    pub fn lookback(&self, lookback: u64) -> SimResult<bool> {
        if lookback == 0 || lookback > self.storage.len() as u64 {
            return Err(SimError::LookbackOutOfRange {
                lookback,
                available: self.storage.len() as u64,
            });
        }
        Ok(self.storage[self.storage.len() - lookback as usize])
    }

    /// Number of results not yet flushed to a writer.
    pub fn num_unwritten(&self) -> usize {
        self.storage.len() - self.written
    }

    /// Streams every unflushed result through `writer` and advances the
    /// write cursor.
    pub fn write_unwritten_results_to<W: RecordWriter + ?Sized>(
        &mut self,
        writer: &mut W,
    ) -> SimResult<()> {
        for &b in &self.storage[self.written..] {
            writer.write_bit(b)?;
        }
        self.written = self.storage.len();
        Ok(())
    }

    /// Discards everything, including the write cursor.
    pub fn clear(&mut self) {
        self.storage.clear();
        self.written = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Format01Writer;

    #[test]
    fn test_lookback() {
        let mut record = MeasureRecord::new();
        record.record_result(true);
        record.record_result(false);
        record.record_result(true);
        assert_eq!(record.lookback(1).unwrap(), true);
        assert_eq!(record.lookback(2).unwrap(), false);
        assert_eq!(record.lookback(3).unwrap(), true);
        assert!(matches!(
            record.lookback(4),
            Err(SimError::LookbackOutOfRange {
                lookback: 4,
                available: 3
            })
        ));
        assert!(record.lookback(0).is_err());
    }

    #[test]
    fn test_write_cursor() {
        let mut record = MeasureRecord::new();
        record.record_result(true);
        record.record_result(false);
        assert_eq!(record.num_unwritten(), 2);

        let mut writer = Format01Writer::new(Vec::new());
        record.write_unwritten_results_to(&mut writer).unwrap();
        assert_eq!(record.num_unwritten(), 0);

        record.record_result(true);
        record.write_unwritten_results_to(&mut writer).unwrap();
        writer.write_end().unwrap();
        assert_eq!(writer.into_inner(), b"101\n");
    }
}
