//! Mock GATT 客户端
//!
//! 用于单元测试和无硬件运行的 mock 外设，支持注入失败场景，
//! 并记录所有 GATT 操作及其并发度。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use contracts::{
    AcquisitionBlueprint, CharProperties, DiscoveredDevice, GattCharacteristic, GattNotification,
    CLIENT_CHARACTERISTIC_CONFIG, DISABLE_VALUE,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::client::{GattClient, NotificationStream};
use crate::error::{GattError, Result};

/// 载荷生成函数：(特征值 UUID, 序号) -> 字节
pub type PayloadFn = Arc<dyn Fn(Uuid, u64) -> Bytes + Send + Sync>;

/// 默认载荷：4 个小端 f32，值为 seq, seq + 0.25, seq + 0.5, seq + 0.75
pub fn default_payload(_uuid: Uuid, seq: u64) -> Bytes {
    let base = seq as f32;
    let mut buf = Vec::with_capacity(16);
    for i in 0..4 {
        buf.extend_from_slice(&(base + i as f32 * 0.25).to_le_bytes());
    }
    Bytes::from(buf)
}

/// Mock 外设配置
#[derive(Clone)]
pub struct MockConfig {
    /// 扫描时可见的设备
    pub devices: Vec<DiscoveredDevice>,
    /// 连接后可发现的特征值
    pub characteristics: Vec<GattCharacteristic>,
    /// connect() 直接失败
    pub fail_connect: bool,
    /// connect() 前的延迟 (用于测试连接超时)
    pub connect_delay: Duration,
    /// 每个 GATT 操作的耗时
    pub op_delay: Duration,
    /// 读取失败的特征值
    pub failing_reads: Vec<Uuid>,
    /// set_notify 失败的特征值
    pub failing_notify: Vec<Uuid>,
    /// 描述符写入永不完成
    pub stall_descriptor_writes: bool,
    /// 仅 CCCD 关闭值 (`DISABLE_VALUE`) 的写入永不完成
    pub stall_disable_writes: bool,
    /// 自动推送间隔 (None = 仅手动 notify)
    pub notify_interval: Option<Duration>,
    /// 载荷生成函数
    pub payload: PayloadFn,
}

impl fmt::Debug for MockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConfig")
            .field("devices", &self.devices.len())
            .field("characteristics", &self.characteristics.len())
            .field("fail_connect", &self.fail_connect)
            .field("op_delay", &self.op_delay)
            .field("notify_interval", &self.notify_interval)
            .finish()
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            devices: vec![DiscoveredDevice {
                address: "00:11:22:33:44:55".into(),
                name: Some("MockSensor".into()),
                services: vec![],
            }],
            characteristics: vec![],
            fail_connect: false,
            connect_delay: Duration::ZERO,
            op_delay: Duration::ZERO,
            failing_reads: vec![],
            failing_notify: vec![],
            stall_descriptor_writes: false,
            stall_disable_writes: false,
            notify_interval: None,
            payload: Arc::new(default_payload),
        }
    }
}

impl MockConfig {
    /// 根据采集配置生成一个匹配的 mock 外设
    ///
    /// 每个配置的特征值都可读、可通知、可指示，并带有 CCCD。
    pub fn for_blueprint(blueprint: &AcquisitionBlueprint) -> Self {
        let service = blueprint.device.uuid_filter.unwrap_or_else(Uuid::nil);
        let device = DiscoveredDevice {
            address: blueprint
                .device
                .address
                .clone()
                .unwrap_or_else(|| "00:11:22:33:44:55".into()),
            name: blueprint
                .device
                .name
                .clone()
                .or_else(|| Some("MockSensor".into())),
            services: vec![service],
        };
        let characteristics = blueprint
            .input
            .characteristics
            .iter()
            .map(|c| GattCharacteristic {
                uuid: c.uuid,
                service_uuid: service,
                properties: CharProperties {
                    read: true,
                    write: false,
                    notify: true,
                    indicate: true,
                },
                descriptors: vec![CLIENT_CHARACTERISTIC_CONFIG],
            })
            .collect();
        Self {
            devices: vec![device],
            characteristics,
            ..Self::default()
        }
    }

    /// 添加一个特征值
    pub fn with_characteristic(mut self, uuid: Uuid, has_cccd: bool) -> Self {
        self.characteristics.push(GattCharacteristic {
            uuid,
            service_uuid: Uuid::nil(),
            properties: CharProperties {
                read: true,
                write: true,
                notify: true,
                indicate: true,
            },
            descriptors: if has_cccd {
                vec![CLIENT_CHARACTERISTIC_CONFIG]
            } else {
                vec![]
            },
        });
        self
    }
}

/// 已记录的 GATT 操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattOp {
    Scan,
    Connect { address: String },
    Discover,
    Read(Uuid),
    Write(Uuid),
    SetNotify {
        characteristic: Uuid,
        enabled: bool,
    },
    WriteDescriptor {
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    Notifications,
    Disconnect,
}

#[derive(Default)]
struct PeripheralState {
    connected: bool,
    notify_enabled: HashSet<Uuid>,
    cccd: HashMap<Uuid, Vec<u8>>,
    ops: Vec<GattOp>,
    in_flight: usize,
    max_in_flight: usize,
    seq: HashMap<Uuid, u64>,
    notify_tx: Option<mpsc::UnboundedSender<GattNotification>>,
    notify_rx: Option<mpsc::UnboundedReceiver<GattNotification>>,
    emitter: Option<JoinHandle<()>>,
}

/// Mock 外设共享句柄
///
/// 客户端被命令队列持有后，测试通过此句柄观察外设状态、注入推送。
#[derive(Clone)]
pub struct MockPeripheral {
    state: Arc<Mutex<PeripheralState>>,
    characteristics: Arc<Vec<GattCharacteristic>>,
    payload: PayloadFn,
}

impl fmt::Debug for MockPeripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MockPeripheral")
            .field("connected", &state.connected)
            .field("ops", &state.ops.len())
            .field("max_in_flight", &state.max_in_flight)
            .finish()
    }
}

impl MockPeripheral {
    fn lock(&self) -> MutexGuard<'_, PeripheralState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 所有已执行的操作 (按开始顺序)
    pub fn ops(&self) -> Vec<GattOp> {
        self.lock().ops.clone()
    }

    /// 满足条件的操作数量
    pub fn count_ops(&self, pred: impl Fn(&GattOp) -> bool) -> usize {
        self.lock().ops.iter().filter(|op| pred(op)).count()
    }

    /// 观察到的最大并发操作数
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn notify_enabled(&self, characteristic: &Uuid) -> bool {
        self.lock().notify_enabled.contains(characteristic)
    }

    /// 当前 CCCD 值
    pub fn cccd_value(&self, characteristic: &Uuid) -> Option<Vec<u8>> {
        self.lock().cccd.get(characteristic).cloned()
    }

    /// 推送一个值；仅当该特征值已启用推送时送达
    pub fn notify(&self, characteristic: Uuid, value: impl Into<Bytes>) -> bool {
        let state = self.lock();
        if !self.deliverable(&state, &characteristic) {
            return false;
        }
        match &state.notify_tx {
            Some(tx) => tx
                .send(GattNotification {
                    uuid: characteristic,
                    value: value.into(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// 用载荷生成函数推送下一个值
    pub fn emit(&self, characteristic: Uuid) -> bool {
        let value = self.next_payload(characteristic);
        self.notify(characteristic, value)
    }

    /// 模拟链路意外断开：推送流结束
    pub fn drop_link(&self) {
        let mut state = self.lock();
        state.connected = false;
        state.notify_tx = None;
        if let Some(emitter) = state.emitter.take() {
            emitter.abort();
        }
    }

    fn next_payload(&self, characteristic: Uuid) -> Bytes {
        let seq = {
            let mut state = self.lock();
            let seq = state.seq.entry(characteristic).or_insert(0);
            let current = *seq;
            *seq += 1;
            current
        };
        (self.payload)(characteristic, seq)
    }

    fn deliverable(&self, state: &PeripheralState, characteristic: &Uuid) -> bool {
        if !state.connected || !state.notify_enabled.contains(characteristic) {
            return false;
        }
        let has_cccd = self
            .characteristics
            .iter()
            .any(|c| c.uuid == *characteristic && c.has_cccd());
        !has_cccd
            || state
                .cccd
                .get(characteristic)
                .is_some_and(|v| v.as_slice() != DISABLE_VALUE)
    }

    fn begin(&self, op: GattOp) -> InFlightGuard {
        let mut state = self.lock();
        state.ops.push(op);
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        InFlightGuard {
            state: Arc::clone(&self.state),
        }
    }
}

/// 操作结束 (含被取消) 时减少并发计数
struct InFlightGuard {
    state: Arc<Mutex<PeripheralState>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

/// Mock GATT 客户端
pub struct MockGattClient {
    /// 配置（可注入失败场景）
    config: MockConfig,
    /// 共享外设状态
    peripheral: MockPeripheral,
}

impl MockGattClient {
    /// 创建默认 mock 客户端
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    /// 使用配置创建 mock 客户端
    pub fn with_config(config: MockConfig) -> Self {
        let peripheral = MockPeripheral {
            state: Arc::new(Mutex::new(PeripheralState::default())),
            characteristics: Arc::new(config.characteristics.clone()),
            payload: Arc::clone(&config.payload),
        };
        Self { config, peripheral }
    }

    /// 获取外设句柄
    pub fn peripheral(&self) -> MockPeripheral {
        self.peripheral.clone()
    }

    async fn simulate_latency(&self) {
        if !self.config.op_delay.is_zero() {
            tokio::time::sleep(self.config.op_delay).await;
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.peripheral.is_connected() {
            Ok(())
        } else {
            Err(GattError::NotConnected)
        }
    }

    fn ensure_characteristic(&self, uuid: Uuid) -> Result<&GattCharacteristic> {
        self.config
            .characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .ok_or(GattError::CharacteristicNotFound { uuid })
    }

    fn spawn_emitter(&self, interval: Duration) -> JoinHandle<()> {
        let peripheral = self.peripheral.clone();
        let uuids: Vec<Uuid> = self.config.characteristics.iter().map(|c| c.uuid).collect();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for uuid in &uuids {
                    let deliverable = {
                        let state = peripheral.lock();
                        peripheral.deliverable(&state, uuid)
                    };
                    if deliverable {
                        peripheral.emit(*uuid);
                    }
                }
            }
        })
    }
}

impl Default for MockGattClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GattClient for MockGattClient {
    #[instrument(name = "mock_gatt_scan", skip(self), fields(filter = ?service_filter))]
    async fn scan(
        &mut self,
        service_filter: Option<Uuid>,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredDevice>> {
        let _guard = self.peripheral.begin(GattOp::Scan);
        let _ = timeout;
        self.simulate_latency().await;
        Ok(self
            .config
            .devices
            .iter()
            .filter(|d| service_filter.map_or(true, |s| d.advertises(&s)))
            .cloned()
            .collect())
    }

    #[instrument(name = "mock_gatt_connect", skip(self, device), fields(address = %device.address))]
    async fn connect(&mut self, device: &DiscoveredDevice) -> Result<()> {
        let _guard = self.peripheral.begin(GattOp::Connect {
            address: device.address.clone(),
        });
        if !self.config.connect_delay.is_zero() {
            tokio::time::sleep(self.config.connect_delay).await;
        }
        if self.config.fail_connect {
            return Err(GattError::ConnectFailed {
                device: device.address.clone(),
                message: "mock failure".into(),
            });
        }
        if !self.config.devices.iter().any(|d| d.address == device.address) {
            return Err(GattError::DeviceNotFound {
                device: device.address.clone(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.peripheral.lock();
        state.connected = true;
        state.notify_tx = Some(tx);
        state.notify_rx = Some(rx);
        Ok(())
    }

    #[instrument(name = "mock_gatt_discover", skip(self))]
    async fn discover_characteristics(&mut self) -> Result<Vec<GattCharacteristic>> {
        let _guard = self.peripheral.begin(GattOp::Discover);
        self.ensure_connected()?;
        self.simulate_latency().await;
        Ok(self.config.characteristics.clone())
    }

    async fn read(&mut self, characteristic: Uuid) -> Result<Bytes> {
        let _guard = self.peripheral.begin(GattOp::Read(characteristic));
        self.ensure_connected()?;
        self.ensure_characteristic(characteristic)?;
        self.simulate_latency().await;
        if self.config.failing_reads.contains(&characteristic) {
            return Err(GattError::operation("read", "mock failure"));
        }
        Ok(self.peripheral.next_payload(characteristic))
    }

    async fn write(&mut self, characteristic: Uuid, value: Bytes) -> Result<()> {
        let _guard = self.peripheral.begin(GattOp::Write(characteristic));
        self.ensure_connected()?;
        self.ensure_characteristic(characteristic)?;
        self.simulate_latency().await;
        debug!(%characteristic, len = value.len(), "mock write");
        Ok(())
    }

    #[instrument(name = "mock_gatt_set_notify", skip(self), fields(%characteristic, enabled))]
    async fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> Result<()> {
        let _guard = self.peripheral.begin(GattOp::SetNotify {
            characteristic,
            enabled,
        });
        self.ensure_connected()?;
        self.ensure_characteristic(characteristic)?;
        self.simulate_latency().await;
        if self.config.failing_notify.contains(&characteristic) {
            return Err(GattError::operation("set_notify", "mock failure"));
        }
        let mut state = self.peripheral.lock();
        if enabled {
            state.notify_enabled.insert(characteristic);
        } else {
            state.notify_enabled.remove(&characteristic);
        }
        Ok(())
    }

    #[instrument(
        name = "mock_gatt_write_descriptor",
        skip(self, value),
        fields(%characteristic, %descriptor)
    )]
    async fn write_descriptor(
        &mut self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
    ) -> Result<()> {
        let _guard = self.peripheral.begin(GattOp::WriteDescriptor {
            characteristic,
            descriptor,
            value: value.to_vec(),
        });
        self.ensure_connected()?;
        let c = self.ensure_characteristic(characteristic)?;
        if !c.descriptors.contains(&descriptor) {
            return Err(GattError::DescriptorNotFound {
                characteristic,
                descriptor,
            });
        }
        self.simulate_latency().await;
        let disabling = value.as_ref() == &DISABLE_VALUE[..];
        if self.config.stall_descriptor_writes || (self.config.stall_disable_writes && disabling) {
            std::future::pending::<()>().await;
        }
        if descriptor == CLIENT_CHARACTERISTIC_CONFIG {
            self.peripheral
                .lock()
                .cccd
                .insert(characteristic, value.to_vec());
        }
        Ok(())
    }

    async fn notifications(&mut self) -> Result<NotificationStream> {
        let _guard = self.peripheral.begin(GattOp::Notifications);
        let rx = self
            .peripheral
            .lock()
            .notify_rx
            .take()
            .ok_or(GattError::NotConnected)?;

        if let Some(interval) = self.config.notify_interval {
            let emitter = self.spawn_emitter(interval);
            if let Some(old) = self.peripheral.lock().emitter.replace(emitter) {
                old.abort();
            }
        }

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|n| (n, rx))
        })
        .boxed())
    }

    #[instrument(name = "mock_gatt_disconnect", skip(self))]
    async fn disconnect(&mut self) -> Result<()> {
        let _guard = self.peripheral.begin(GattOp::Disconnect);
        // 幂等：未连接时也返回 Ok
        let mut state = self.peripheral.lock();
        state.connected = false;
        state.notify_tx = None;
        state.notify_rx = None;
        state.notify_enabled.clear();
        state.cccd.clear();
        if let Some(emitter) = state.emitter.take() {
            emitter.abort();
        }
        Ok(())
    }
}
