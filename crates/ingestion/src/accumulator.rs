//! Poll 模式行聚合
//!
//! 特征值逐个读取，值按通道累积成一行后再写入缓冲区。
//! 触发写出的两种情况：
//! - 所有绑定的数值通道都已到达 (自动写出，仅一次)
//! - 某通道在未写出前再次到达 (立即写出当前行，缺失通道为 NaN，再以新值开始下一行)

use std::collections::BTreeMap;

use contracts::ChannelIndex;

/// 一行待写入的值，按通道顺序排列
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<(ChannelIndex, f64)>,
}

impl Row {
    pub fn nan_count(&self) -> usize {
        self.values.iter().filter(|(_, v)| v.is_nan()).count()
    }
}

/// Poll 模式累加器
#[derive(Debug, Clone, Default)]
pub struct PollAccumulator {
    /// 期望的数值通道 (升序)
    expected: Vec<ChannelIndex>,
    pending: BTreeMap<ChannelIndex, f64>,
    /// 因重复到达而提前写出的行数
    early_flushes: u64,
}

impl PollAccumulator {
    pub fn new(mut expected: Vec<ChannelIndex>) -> Self {
        expected.sort_unstable();
        expected.dedup();
        Self {
            expected,
            pending: BTreeMap::new(),
            early_flushes: 0,
        }
    }

    pub fn expected(&self) -> &[ChannelIndex] {
        &self.expected
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn early_flushes(&self) -> u64 {
        self.early_flushes
    }

    /// 放入一次读取得到的全部通道值，返回需要写出的行
    ///
    /// 没有数值通道时，每次读取产生一个空行 (只写时间)。
    pub fn insert_all(&mut self, values: &[(ChannelIndex, f64)]) -> Vec<Row> {
        let mut rows = Vec::new();
        if self.expected.is_empty() {
            rows.push(Row { values: Vec::new() });
            return rows;
        }
        for &(channel, value) in values {
            rows.extend(self.insert(channel, value));
        }
        rows
    }

    /// 放入单个通道值
    ///
    /// 最多返回两行：重复到达时的提前写出，以及(单通道时)新行立即完整。
    pub fn insert(&mut self, channel: ChannelIndex, value: f64) -> Vec<Row> {
        if self.expected.binary_search(&channel).is_err() {
            tracing::debug!(channel, "value for unbound channel ignored");
            return Vec::new();
        }

        let mut rows = Vec::new();
        if self.pending.contains_key(&channel) {
            self.early_flushes += 1;
            rows.extend(self.flush());
        }
        self.pending.insert(channel, value);
        if self.pending.len() == self.expected.len() {
            rows.extend(self.flush());
        }
        rows
    }

    /// 写出当前行，缺失通道填 NaN；为空时返回 None
    pub fn flush(&mut self) -> Option<Row> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        Some(Row {
            values: self
                .expected
                .iter()
                .map(|&ch| (ch, pending.get(&ch).copied().unwrap_or(f64::NAN)))
                .collect(),
        })
    }

    /// 丢弃未完成的行
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_row_flushes_once() {
        let mut acc = PollAccumulator::new(vec![1, 0]);
        assert!(acc.insert(0, 1.0).is_empty());
        let rows = acc.insert(1, 2.0);
        assert_eq!(
            rows,
            vec![Row {
                values: vec![(0, 1.0), (1, 2.0)]
            }]
        );
        assert_eq!(acc.pending_len(), 0);
        assert!(acc.flush().is_none());
    }

    #[test]
    fn test_repeated_channel_flushes_with_nan() {
        let mut acc = PollAccumulator::new(vec![0, 1, 2]);
        acc.insert(0, 1.0);
        acc.insert(1, 2.0);

        let rows = acc.insert(0, 3.0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values[0], (0, 1.0));
        assert_eq!(rows[0].values[1], (1, 2.0));
        assert!(rows[0].values[2].1.is_nan());
        assert_eq!(rows[0].nan_count(), 1);

        // the new value starts the next row
        assert_eq!(acc.pending_len(), 1);
        assert_eq!(acc.early_flushes(), 1);
    }

    #[test]
    fn test_single_channel_repeated() {
        let mut acc = PollAccumulator::new(vec![4]);
        assert_eq!(acc.insert(4, 1.0).len(), 1);
        assert_eq!(acc.insert(4, 2.0).len(), 1);
        assert_eq!(acc.early_flushes(), 0);
    }

    #[test]
    fn test_batch_from_one_read() {
        let mut acc = PollAccumulator::new(vec![0, 1, 2]);
        assert!(acc.insert_all(&[(0, 1.0), (1, 2.0)]).is_empty());
        let rows = acc.insert_all(&[(2, 3.0)]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].nan_count(), 0);
    }

    #[test]
    fn test_time_only_binding() {
        let mut acc = PollAccumulator::new(vec![]);
        let rows = acc.insert_all(&[]);
        assert_eq!(rows, vec![Row { values: vec![] }]);
    }

    #[test]
    fn test_unbound_channel_ignored() {
        let mut acc = PollAccumulator::new(vec![0]);
        assert!(acc.insert(7, 1.0).is_empty());
        assert_eq!(acc.pending_len(), 0);
    }
}
