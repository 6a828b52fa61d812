//! 采集指标记录
//!
//! 通过 `metrics` facade 记录，由 Prometheus exporter 导出。
//! 另提供内存聚合器，用于运行结束时输出摘要。

use std::collections::BTreeMap;

use metrics::{counter, gauge, histogram};

/// 记录一次样本事件写入的行 (mode: poll / notification / indication)
pub fn record_rows_appended(mode: &str, values: usize) {
    counter!("ble_acq_rows_appended_total", "mode" => mode.to_string()).increment(1);
    counter!("ble_acq_values_appended_total").increment(values as u64);
}

/// 记录 GATT 命令执行结果与耗时
pub fn record_gatt_command(kind: &'static str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "ble_acq_gatt_commands_total",
        "kind" => kind,
        "status" => status
    )
    .increment(1);
    histogram!("ble_acq_gatt_command_duration_seconds", "kind" => kind).record(duration_secs);
}

/// 记录命令队列深度
pub fn record_queue_depth(depth: usize) {
    gauge!("ble_acq_gatt_queue_depth").set(depth as f64);
}

/// 记录一次等待确认 (purpose: subscribe / unsubscribe / notify_flag)
pub fn record_latch_wait(purpose: &'static str, outcome: &str, waited_ms: f64) {
    counter!(
        "ble_acq_latch_waits_total",
        "purpose" => purpose,
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("ble_acq_latch_wait_ms", "purpose" => purpose).record(waited_ms);
}

/// 记录转换失败 (该通道写入 NaN)
pub fn record_conversion_failure(channel: usize) {
    counter!("ble_acq_conversion_failures_total", "channel" => channel.to_string()).increment(1);
}

/// 记录读取失败 (该特征值的所有通道写入 NaN)
pub fn record_read_failure(characteristic: &str) {
    counter!(
        "ble_acq_read_failures_total",
        "characteristic" => characteristic.to_string()
    )
    .increment(1);
}

/// 记录缓冲区深度
pub fn record_buffer_depth(channel: &str, depth: usize) {
    gauge!("ble_acq_buffer_depth", "channel" => channel.to_string()).set(depth as f64);
}

/// 记录连接状态变化
pub fn record_connection_state(state: &str) {
    counter!("ble_acq_connection_transitions_total", "state" => state.to_string()).increment(1);
}

/// 采集指标聚合器
///
/// 在内存中聚合通道数据，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct AcquisitionMetricsAggregator {
    /// 各数值通道：(总数, NaN 数)
    pub channel_counts: BTreeMap<String, (u64, u64)>,

    /// 采样间隔统计 (毫秒)
    pub interval_stats: RunningStats,

    /// 时间倒退次数
    pub time_regressions: u64,

    /// 采集时长 (秒)
    pub span_secs: f64,
}

impl AcquisitionMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计一个数值通道
    pub fn update_channel(&mut self, name: &str, values: &[f64]) {
        let entry = self.channel_counts.entry(name.to_string()).or_insert((0, 0));
        entry.0 += values.len() as u64;
        entry.1 += values.iter().filter(|v| v.is_nan()).count() as u64;
    }

    /// 累计一个时间通道 (秒)
    pub fn update_time_channel(&mut self, times: &[f64]) {
        for pair in times.windows(2) {
            let delta = pair[1] - pair[0];
            if delta < 0.0 {
                self.time_regressions += 1;
            } else {
                self.interval_stats.push(delta * 1000.0);
            }
        }
        if let (Some(first), Some(last)) = (times.first(), times.last()) {
            self.span_secs = self.span_secs.max(last - first);
        }
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        let total_values: u64 = self.channel_counts.values().map(|(n, _)| n).sum();
        let total_nan: u64 = self.channel_counts.values().map(|(_, nan)| nan).sum();
        let interval = StatsSummary::from(&self.interval_stats);
        MetricsSummary {
            total_values,
            total_nan,
            nan_rate: if total_values > 0 {
                total_nan as f64 / total_values as f64 * 100.0
            } else {
                0.0
            },
            effective_rate_hz: if interval.mean > 0.0 {
                1000.0 / interval.mean
            } else {
                0.0
            },
            interval_ms: interval,
            time_regressions: self.time_regressions,
            span_secs: self.span_secs,
            channel_counts: self.channel_counts.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_values: u64,
    pub total_nan: u64,
    pub nan_rate: f64,
    pub effective_rate_hz: f64,
    pub interval_ms: StatsSummary,
    pub time_regressions: u64,
    pub span_secs: f64,
    pub channel_counts: BTreeMap<String, (u64, u64)>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Acquisition Metrics Summary ===")?;
        writeln!(f, "Span: {:.3}s", self.span_secs)?;
        writeln!(
            f,
            "Values: {} (NaN: {}, {:.2}%)",
            self.total_values, self.total_nan, self.nan_rate
        )?;
        writeln!(f, "Sample interval (ms): {}", self.interval_ms)?;
        writeln!(f, "Effective rate: {:.2} Hz", self.effective_rate_hz)?;
        if self.time_regressions > 0 {
            writeln!(f, "Time regressions: {}", self.time_regressions)?;
        }

        if !self.channel_counts.is_empty() {
            writeln!(f, "Channels:")?;
            for (name, (count, nan)) in &self.channel_counts {
                writeln!(f, "  {}: {} values, {} NaN", name, count, nan)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }
}
