//! 采集会话核心
//!
//! 由 GATT 事件回调驱动：查找特征值绑定 → 转换 → 时间原点 → 加锁写入缓冲区。
//! 锁顺序固定为 session → buffers，临界区内无 I/O。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use buffer_sync::{BufferGroup, Clock, TimeOrigin};
use contracts::{AcquisitionMode, ChannelIndex, CharacteristicBinding, CharacteristicMap};
use gatt_link::GattEvent;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::accumulator::{PollAccumulator, Row};
use crate::config::IngestionMetrics;
use crate::conversion::try_convert;

/// 当前连接的绑定表
#[derive(Debug, Default)]
pub(crate) struct Bindings {
    pub map: CharacteristicMap,
    /// 所有时间通道 (去重)
    pub time_channels: Vec<ChannelIndex>,
}

#[derive(Debug, Default)]
struct Session {
    origin: TimeOrigin,
    accumulator: PollAccumulator,
}

pub(crate) struct AcquisitionCore {
    mode: AcquisitionMode,
    mode_label: String,
    buffers: BufferGroup,
    bindings: RwLock<Arc<Bindings>>,
    session: Mutex<Session>,
    clock: Arc<dyn Clock>,
    accepting: AtomicBool,
    link_lost: AtomicBool,
    metrics: Arc<IngestionMetrics>,
}

impl AcquisitionCore {
    pub fn new(
        mode: AcquisitionMode,
        buffers: BufferGroup,
        clock: Arc<dyn Clock>,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        Self {
            mode,
            mode_label: mode.kind().to_string(),
            buffers,
            bindings: RwLock::new(Arc::new(Bindings::default())),
            session: Mutex::new(Session::default()),
            clock,
            accepting: AtomicBool::new(false),
            link_lost: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn buffers(&self) -> &BufferGroup {
        &self.buffers
    }

    pub fn bindings(&self) -> Arc<Bindings> {
        Arc::clone(&self.bindings.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// 安装新连接的特征值表，重建累加器
    pub fn install(&self, map: CharacteristicMap) {
        let expected = map.value_channels();
        let time_channels = map.time_channels();
        *self.bindings.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(Bindings { map, time_channels });
        self.lock_session().accumulator = PollAccumulator::new(expected);
        self.link_lost.store(false, Ordering::SeqCst);
    }

    /// 开始会话：除非恢复暂停的会话，否则重置 t0
    pub fn begin(&self, preserve_origin: bool) {
        let mut session = self.lock_session();
        if !preserve_origin {
            session.origin.reset();
        }
        session.accumulator.clear();
    }

    /// 丢弃未完成的 poll 行
    pub fn discard_pending(&self) {
        self.lock_session().accumulator.clear();
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn is_link_lost(&self) -> bool {
        self.link_lost.load(Ordering::SeqCst)
    }

    pub fn t0(&self) -> Option<i64> {
        self.lock_session().origin.t0()
    }

    /// GATT 事件入口 (在 worker 或通知任务中调用)
    pub fn handle_event(&self, event: GattEvent) {
        match event {
            GattEvent::ReadCompleted {
                characteristic,
                value,
            } => self.on_read(characteristic, value.as_deref()),
            GattEvent::Notification {
                characteristic,
                value,
            } => self.on_notification(characteristic, &value),
            GattEvent::LinkLost => {
                self.accepting.store(false, Ordering::SeqCst);
                self.link_lost.store(true, Ordering::SeqCst);
                warn!("link lost, acquisition paused");
            }
        }
    }

    fn on_read(&self, characteristic: Uuid, payload: Option<&[u8]>) {
        if !self.is_accepting() {
            self.metrics.record_dropped();
            trace!(%characteristic, "read completion while not acquiring");
            return;
        }
        let bindings = self.bindings();
        let Some(binding) = bindings.map.get(&characteristic) else {
            debug!(%characteristic, "read completion for unbound characteristic");
            return;
        };
        if payload.is_none() {
            self.metrics.record_read_failure();
            observability::record_read_failure(&characteristic.to_string());
        }
        let values = self.convert(binding, payload);

        let mut session = self.lock_session();
        let early_before = session.accumulator.early_flushes();
        let rows = session.accumulator.insert_all(&values);
        for _ in early_before..session.accumulator.early_flushes() {
            self.metrics.record_early_flush();
        }
        for row in rows {
            self.append(&mut session, &bindings, &row, &bindings.time_channels);
        }
    }

    fn on_notification(&self, characteristic: Uuid, payload: &[u8]) {
        if !self.is_accepting() {
            self.metrics.record_dropped();
            trace!(%characteristic, "notification while not acquiring");
            return;
        }
        if !self.mode.is_push() {
            trace!(%characteristic, "notification ignored in poll mode");
            return;
        }
        let bindings = self.bindings();
        let Some(binding) = bindings.map.get(&characteristic) else {
            debug!(%characteristic, "notification for unbound characteristic");
            return;
        };
        let row = Row {
            values: self.convert(binding, Some(payload)),
        };
        let time_channels: Vec<ChannelIndex> = binding.time_channel.into_iter().collect();

        let mut session = self.lock_session();
        self.append(&mut session, &bindings, &row, &time_channels);
    }

    /// 逐通道转换，失败的通道记为 NaN
    fn convert(
        &self,
        binding: &CharacteristicBinding,
        payload: Option<&[u8]>,
    ) -> Vec<(ChannelIndex, f64)> {
        binding
            .channels
            .iter()
            .map(|b| {
                let value = match payload {
                    None => f64::NAN,
                    Some(payload) => match try_convert(&b.conversion, payload) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(
                                channel = b.channel,
                                conversion = b.conversion.name(),
                                error = %e,
                                "conversion failed"
                            );
                            self.metrics.record_conversion_failure();
                            observability::record_conversion_failure(b.channel);
                            f64::NAN
                        }
                    },
                };
                (b.channel, value)
            })
            .collect()
    }

    /// 在一次缓冲区锁内写入一行及其时间
    fn append(
        &self,
        session: &mut Session,
        bindings: &Bindings,
        row: &Row,
        time_channels: &[ChannelIndex],
    ) {
        let now = self.clock.now_nanos();
        let mut buffers = self.buffers.lock();
        if !session.origin.is_set() {
            let resume = buffers.max_last_value(&bindings.time_channels);
            let t0 = session.origin.anchor(now, resume);
            debug!(t0, resume_secs = ?resume, "time origin anchored");
        }
        let elapsed = session.origin.elapsed_secs(now);
        for &(channel, value) in &row.values {
            buffers.append(channel, value);
        }
        for &channel in time_channels {
            buffers.append(channel, elapsed);
        }
        drop(buffers);

        let nan = row.nan_count();
        self.metrics.record_row(row.values.len(), nan);
        observability::record_rows_appended(&self.mode_label, row.values.len());
        trace!(values = row.values.len(), nan, elapsed, "row appended");
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffer_sync::ManualClock;
    use bytes::Bytes;
    use contracts::{
        BufferConfig, ByteOrder, ChannelBinding, CharProperties, ConversionFunction,
        GattCharacteristic,
    };

    const A: Uuid = Uuid::from_u128(0xa1);
    const B: Uuid = Uuid::from_u128(0xb2);

    fn binding(uuid: Uuid, channels: &[(usize, usize)], time: Option<usize>) -> CharacteristicBinding {
        CharacteristicBinding {
            characteristic: GattCharacteristic {
                uuid,
                service_uuid: Uuid::nil(),
                properties: CharProperties::default(),
                descriptors: vec![],
            },
            channels: channels
                .iter()
                .map(|&(channel, offset)| ChannelBinding {
                    channel,
                    conversion: ConversionFunction::Int16 {
                        offset,
                        byte_order: ByteOrder::Little,
                    },
                })
                .collect(),
            time_channel: time,
        }
    }

    fn core(mode: AcquisitionMode, clock: &ManualClock, buffers: usize) -> AcquisitionCore {
        let configs: Vec<BufferConfig> = (0..buffers)
            .map(|i| BufferConfig {
                name: format!("b{i}"),
                capacity: 0,
            })
            .collect();
        AcquisitionCore::new(
            mode,
            BufferGroup::from_config(&configs),
            Arc::new(clock.clone()),
            Arc::new(IngestionMetrics::new()),
        )
    }

    fn i16s(values: &[i16]) -> Bytes {
        Bytes::from(values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>())
    }

    fn poll() -> AcquisitionMode {
        AcquisitionMode::Poll {
            period: std::time::Duration::from_millis(100),
        }
    }

    #[test]
    fn test_poll_rows_span_characteristics() {
        let clock = ManualClock::new(1_000_000_000);
        let core = core(poll(), &clock, 3);
        let mut map = CharacteristicMap::new();
        map.insert(binding(A, &[(0, 0)], Some(2)));
        map.insert(binding(B, &[(1, 0)], None));
        core.install(map);
        core.begin(false);
        core.set_accepting(true);

        core.handle_event(GattEvent::ReadCompleted {
            characteristic: A,
            value: Some(i16s(&[5])),
        });
        assert_eq!(core.buffers().lock().len(0), 0);
        clock.advance_secs(0.1);
        core.handle_event(GattEvent::ReadCompleted {
            characteristic: B,
            value: Some(i16s(&[7])),
        });

        let buffers = core.buffers().lock();
        assert_eq!(buffers.last_value(0), Some(5.0));
        assert_eq!(buffers.last_value(1), Some(7.0));
        assert_eq!(buffers.last_value(2), Some(0.0));
    }

    #[test]
    fn test_failed_read_writes_nan() {
        let clock = ManualClock::new(0);
        let core = core(poll(), &clock, 2);
        let mut map = CharacteristicMap::new();
        map.insert(binding(A, &[(0, 0), (1, 2)], None));
        core.install(map);
        core.set_accepting(true);

        core.handle_event(GattEvent::ReadCompleted {
            characteristic: A,
            value: None,
        });
        let buffers = core.buffers().lock();
        assert!(buffers.last_value(0).unwrap().is_nan());
        assert!(buffers.last_value(1).unwrap().is_nan());
        drop(buffers);
        assert_eq!(core.metrics.snapshot().read_failures, 1);
    }

    #[test]
    fn test_conversion_failure_keeps_siblings() {
        let clock = ManualClock::new(0);
        let core = core(AcquisitionMode::Notification, &clock, 3);
        let mut map = CharacteristicMap::new();
        // channel 1 reads past the end of a 2-byte payload
        map.insert(binding(A, &[(0, 0), (1, 4)], Some(2)));
        core.install(map);
        core.set_accepting(true);

        core.handle_event(GattEvent::Notification {
            characteristic: A,
            value: i16s(&[42]),
        });
        let buffers = core.buffers().lock();
        assert_eq!(buffers.last_value(0), Some(42.0));
        assert!(buffers.last_value(1).unwrap().is_nan());
        assert_eq!(buffers.len(2), 1);
        drop(buffers);
        assert_eq!(core.metrics.snapshot().conversion_failures, 1);
    }

    #[test]
    fn test_origin_stable_and_resumes_from_buffered_time() {
        let clock = ManualClock::new(5_000_000_000);
        let core = core(AcquisitionMode::Notification, &clock, 2);
        let mut map = CharacteristicMap::new();
        map.insert(binding(A, &[(0, 0)], Some(1)));
        core.install(map);
        core.set_accepting(true);

        let push = || {
            core.handle_event(GattEvent::Notification {
                characteristic: A,
                value: i16s(&[1]),
            })
        };
        push();
        let t0 = core.t0().unwrap();
        clock.advance_secs(1.5);
        push();
        assert_eq!(core.t0(), Some(t0));
        assert_eq!(core.buffers().lock().last_value(1), Some(1.5));

        // fresh session with retained buffers continues the timeline
        core.begin(false);
        clock.advance_secs(60.0);
        push();
        let last = core.buffers().lock().last_value(1).unwrap();
        assert!((last - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_events_dropped_when_not_accepting() {
        let clock = ManualClock::new(0);
        let core = core(AcquisitionMode::Notification, &clock, 1);
        let mut map = CharacteristicMap::new();
        map.insert(binding(A, &[(0, 0)], None));
        core.install(map);

        core.handle_event(GattEvent::Notification {
            characteristic: A,
            value: i16s(&[1]),
        });
        assert_eq!(core.buffers().lock().len(0), 0);
        assert_eq!(core.metrics.snapshot().events_dropped, 1);
    }

    #[test]
    fn test_link_lost_stops_accepting() {
        let clock = ManualClock::new(0);
        let core = core(AcquisitionMode::Notification, &clock, 1);
        core.set_accepting(true);
        core.handle_event(GattEvent::LinkLost);
        assert!(!core.is_accepting());
        assert!(core.is_link_lost());
        core.install(CharacteristicMap::new());
        assert!(!core.is_link_lost());
    }
}
