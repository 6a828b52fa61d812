//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置到采集的端到端流程 (mock 外设，无需蓝牙硬件)
//! - Poll / Notification / Indication 三种模式的行为
//! - 断线暂停与恢复时的时间连续性
//! - GATT 命令串行化

#[cfg(test)]
mod support {
    use std::sync::Arc;
    use std::time::Duration;

    use buffer_sync::Clock;
    use contracts::{
        AcquisitionBlueprint, BufferConfig, BufferReader, ByteOrder, ChannelBindingConfig,
        ChannelIndex, CharacteristicConfig, ConfigVersion, ConversionFunction, DeviceConfig,
        InputConfig, ModeKind,
    };
    use gatt_link::{GattClient, MockGattClient};
    use ingestion::BluetoothInput;
    use uuid::Uuid;

    pub const ACC: Uuid = Uuid::from_u128(0xf000aa81_0451_4000_b000_000000000000);
    pub const GYRO: Uuid = Uuid::from_u128(0xf000aa82_0451_4000_b000_000000000000);

    /// Clock on tokio time, so paused tests see virtual time
    pub struct TokioClock {
        base: tokio::time::Instant,
    }

    impl TokioClock {
        pub fn new() -> Self {
            Self {
                base: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now_nanos(&self) -> i64 {
            self.base.elapsed().as_nanos() as i64
        }
    }

    /// Little-endian f32 at `offset`
    pub fn f32_at(offset: usize) -> ConversionFunction {
        ConversionFunction::Float32 {
            offset,
            byte_order: ByteOrder::Little,
        }
    }

    pub fn characteristic(
        uuid: Uuid,
        channels: &[(ChannelIndex, ConversionFunction)],
        time_channel: Option<ChannelIndex>,
    ) -> CharacteristicConfig {
        CharacteristicConfig {
            uuid,
            channels: channels
                .iter()
                .map(|(channel, conversion)| ChannelBindingConfig {
                    channel: *channel,
                    conversion: conversion.clone(),
                })
                .collect(),
            time_channel,
        }
    }

    pub fn blueprint(
        mode: ModeKind,
        rate_hz: f64,
        subscribe_on_start: bool,
        characteristics: Vec<CharacteristicConfig>,
        buffers: &[&str],
    ) -> AcquisitionBlueprint {
        AcquisitionBlueprint {
            version: ConfigVersion::V1,
            device: DeviceConfig {
                id: "tag".into(),
                name: Some("MockSensor".into()),
                address: None,
                uuid_filter: None,
                connect_timeout_ms: 1_000,
                scan_timeout_ms: 10,
            },
            input: InputConfig {
                mode,
                rate_hz,
                subscribe_on_start,
                queue_capacity: 16,
                characteristics,
            },
            buffers: buffers
                .iter()
                .map(|name| BufferConfig {
                    name: name.to_string(),
                    capacity: 0,
                })
                .collect(),
        }
    }

    pub fn input_with(
        blueprint: &AcquisitionBlueprint,
        client: MockGattClient,
    ) -> BluetoothInput<MockGattClient> {
        BluetoothInput::with_clock(blueprint, client, Arc::new(TokioClock::new())).unwrap()
    }

    /// Contents of one channel
    pub fn values<C: GattClient>(input: &BluetoothInput<C>, channel: ChannelIndex) -> Vec<f64> {
        input.buffers().snapshot(channel)
    }

    /// Let the forwarder and callbacks run
    pub async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[cfg(test)]
mod config_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use gatt_link::{MockConfig, MockGattClient};

    use crate::support::*;

    const NOTIFY_CONFIG: &str = r#"
[device]
name = "CC2650 SensorTag"

[input]
mode = "notification"

[[input.characteristics]]
uuid = "f000aa81-0451-4000-b000-000000000000"
time_channel = 2
[[input.characteristics.channels]]
channel = 0
conversion = { type = "float32", offset = 0 }
[[input.characteristics.channels]]
channel = 1
conversion = { type = "float32", offset = 8 }

[[buffers]]
name = "x"
[[buffers]]
name = "y"
[[buffers]]
name = "t"
"#;

    /// 配置文件 -> mock 外设 -> 缓冲区
    #[tokio::test(start_paused = true)]
    async fn test_config_to_buffers() {
        let bp = ConfigLoader::load_from_str(NOTIFY_CONFIG, ConfigFormat::Toml).unwrap();
        let mock = MockConfig {
            notify_interval: Some(Duration::from_millis(100)),
            ..MockConfig::for_blueprint(&bp)
        };
        let mut input = input_with(&bp, MockGattClient::with_config(mock));

        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;
        input.stop().await;

        let x = values(&input, 0);
        let y = values(&input, 1);
        let t = values(&input, 2);
        assert!(!t.is_empty());
        assert_eq!(x.len(), t.len());
        assert_eq!(y.len(), t.len());
        for (a, b) in x.iter().zip(&y) {
            assert_eq!(b - a, 0.5);
        }
        input.close_connection().await;
    }

    #[test]
    fn test_json_and_toml_agree() {
        let toml = ConfigLoader::load_from_str(NOTIFY_CONFIG, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&toml).unwrap();
        let back = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(back.input.mode, toml.input.mode);
        assert_eq!(back.input.characteristics.len(), 1);
        assert_eq!(
            back.input.characteristics[0].channels[1].conversion,
            f32_at(8)
        );
    }
}

#[cfg(test)]
mod poll_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use contracts::ModeKind;
    use gatt_link::{GattOp, MockConfig, MockGattClient};

    use crate::support::*;

    fn two_characteristics(rate_hz: f64) -> contracts::AcquisitionBlueprint {
        blueprint(
            ModeKind::Poll,
            rate_hz,
            false,
            vec![
                characteristic(ACC, &[(0, f32_at(0))], Some(2)),
                characteristic(GYRO, &[(1, f32_at(4))], Some(2)),
            ],
            &["acc", "gyro", "t"],
        )
    }

    fn mock() -> MockConfig {
        MockConfig::default()
            .with_characteristic(ACC, true)
            .with_characteristic(GYRO, true)
    }

    /// 10 Hz 轮询两个特征值：每周期一行，时间间隔 0.1s
    #[tokio::test(start_paused = true)]
    async fn test_poll_10hz_rows() {
        let bp = two_characteristics(10.0);
        let client = MockGattClient::with_config(mock());
        let peripheral = client.peripheral();
        let mut input = input_with(&bp, client);

        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1050)).await;
        input.stop().await;

        let acc = values(&input, 0);
        let gyro = values(&input, 1);
        let t = values(&input, 2);

        assert_eq!(t.len(), 11, "t = {t:?}");
        assert_eq!(acc.len(), t.len());
        assert_eq!(gyro.len(), t.len());
        for (i, (a, g)) in acc.iter().zip(&gyro).enumerate() {
            assert_eq!(*a, i as f64);
            assert_eq!(*g, i as f64 + 0.25);
        }
        assert_eq!(t[0], 0.0);
        for pair in t.windows(2) {
            assert!((pair[1] - pair[0] - 0.1).abs() < 1e-6, "t = {t:?}");
        }

        let metrics = input.metrics();
        assert_eq!(metrics.rows_appended, 11);
        assert_eq!(metrics.nan_values, 0);
        assert_eq!(peripheral.max_in_flight(), 1);
        input.close_connection().await;
    }

    /// 一个特征值扇出两个通道：每 100ms 各增长一项
    #[tokio::test(start_paused = true)]
    async fn test_poll_two_channels_one_characteristic() {
        let bp = blueprint(
            ModeKind::Poll,
            10.0,
            false,
            vec![characteristic(ACC, &[(0, f32_at(0)), (1, f32_at(12))], Some(2))],
            &["a", "b", "t"],
        );
        let client =
            MockGattClient::with_config(MockConfig::default().with_characteristic(ACC, true));
        let mut input = input_with(&bp, client);

        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();
        settle().await;

        let mut previous = 0;
        for tick in 1..=5 {
            let len = values(&input, 0).len();
            assert_eq!(len, tick, "after {} ticks", tick);
            assert_eq!(values(&input, 1).len(), len);
            assert!(len > previous);
            previous = len;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        input.stop().await;

        let a = values(&input, 0);
        let b = values(&input, 1);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(y - x, 0.75);
        }
        let t = values(&input, 2);
        assert!(t.windows(2).all(|p| p[1] > p[0]));
        input.close_connection().await;
    }

    /// 读取失败：该特征值的通道为 NaN，其余通道不受影响
    #[tokio::test(start_paused = true)]
    async fn test_failed_read_only_affects_its_channels() {
        let bp = two_characteristics(10.0);
        let mut config = mock();
        config.failing_reads = vec![GYRO];
        let mut input = input_with(&bp, MockGattClient::with_config(config));

        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        input.stop().await;

        let acc = values(&input, 0);
        let gyro = values(&input, 1);
        assert_eq!(acc.len(), 3);
        assert!(acc.iter().all(|v| v.is_finite()));
        assert_eq!(gyro.len(), 3);
        assert!(gyro.iter().all(|v| v.is_nan()));
        assert_eq!(input.metrics().read_failures, 3);
        input.close_connection().await;
    }

    /// 最快速度轮询：命令严格串行，按提交顺序执行
    #[tokio::test(start_paused = true)]
    async fn test_fast_poll_is_serialized_in_order() {
        let bp = two_characteristics(0.0);
        let mut config = mock();
        config.op_delay = Duration::from_millis(1);
        let client = MockGattClient::with_config(config);
        let peripheral = client.peripheral();
        let mut input = input_with(&bp, client);

        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        input.stop().await;
        input.close_connection().await;

        assert_eq!(peripheral.max_in_flight(), 1);
        let reads: Vec<_> = peripheral
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                GattOp::Read(uuid) => Some(uuid),
                _ => None,
            })
            .collect();
        assert!(reads.len() >= 20, "only {} reads", reads.len());
        for (i, uuid) in reads.iter().enumerate() {
            assert_eq!(*uuid, if i % 2 == 0 { ACC } else { GYRO });
        }

        let t = values(&input, 2);
        assert!(t.windows(2).all(|p| p[1] >= p[0]));
    }
}

#[cfg(test)]
mod push_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use contracts::{
        ContractError, ModeKind, CLIENT_CHARACTERISTIC_CONFIG, DISABLE_VALUE,
        ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
    };
    use gatt_link::{GattOp, MockConfig, MockGattClient};
    use ingestion::InputState;

    use crate::support::*;

    fn single(mode: ModeKind, subscribe_on_start: bool) -> contracts::AcquisitionBlueprint {
        blueprint(
            mode,
            0.0,
            subscribe_on_start,
            vec![characteristic(ACC, &[(0, f32_at(0)), (1, f32_at(4))], Some(2))],
            &["x", "y", "t"],
        )
    }

    /// 连接时订阅：start 之前的推送被丢弃
    #[tokio::test(start_paused = true)]
    async fn test_notification_subscribed_at_connect() {
        let bp = single(ModeKind::Notification, false);
        let client = MockGattClient::with_config(MockConfig::default().with_characteristic(ACC, true));
        let peripheral = client.peripheral();
        let mut input = input_with(&bp, client);

        input.connect(&HashMap::new()).await.unwrap();
        assert!(peripheral.notify_enabled(&ACC));
        assert_eq!(
            peripheral.cccd_value(&ACC),
            Some(ENABLE_NOTIFICATION_VALUE.to_vec())
        );

        assert!(peripheral.emit(ACC));
        settle().await;
        assert!(values(&input, 2).is_empty());
        assert_eq!(input.metrics().events_dropped, 1);

        input.start().await.unwrap();
        for _ in 0..3 {
            assert!(peripheral.emit(ACC));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(values(&input, 0), vec![1.0, 2.0, 3.0]);
        assert_eq!(values(&input, 1), vec![1.25, 2.25, 3.25]);
        let t = values(&input, 2);
        assert_eq!(t.len(), 3);
        assert!((t[2] - t[0] - 0.04).abs() < 1e-6);

        // 连接时的订阅在 stop 后保留
        input.stop().await;
        assert!(peripheral.notify_enabled(&ACC));
        input.close_connection().await;
    }

    /// 无 CCCD 的特征值：只设置通知标志，不写描述符
    #[tokio::test(start_paused = true)]
    async fn test_absent_cccd_is_accepted() {
        let bp = single(ModeKind::Notification, true);
        let client =
            MockGattClient::with_config(MockConfig::default().with_characteristic(ACC, false));
        let peripheral = client.peripheral();
        let mut input = input_with(&bp, client);

        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();
        assert!(peripheral.notify_enabled(&ACC));
        assert_eq!(
            peripheral.count_ops(|op| matches!(op, GattOp::WriteDescriptor { .. })),
            0
        );

        assert!(peripheral.emit(ACC));
        settle().await;
        assert_eq!(values(&input, 0), vec![0.0]);

        input.stop().await;
        assert!(!peripheral.notify_enabled(&ACC));
        input.close_connection().await;
    }

    /// 描述符写入未确认：connect 失败并关闭链路
    #[tokio::test(start_paused = true)]
    async fn test_stalled_descriptor_write_fails_connect() {
        let bp = single(ModeKind::Indication, false);
        let mut config = MockConfig::default().with_characteristic(ACC, true);
        config.stall_descriptor_writes = true;
        let client = MockGattClient::with_config(config);
        let peripheral = client.peripheral();
        let mut input = input_with(&bp, client);

        let started = tokio::time::Instant::now();
        let err = input.connect(&HashMap::new()).await.unwrap_err();
        match err {
            ContractError::NotificationSetup { characteristic, .. } => {
                assert_eq!(characteristic, ACC.to_string())
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(started.elapsed() >= ingestion::SUBSCRIBE_TIMEOUT);
        assert_eq!(input.state(), InputState::Disconnected);
        assert!(!peripheral.is_connected());
        assert_eq!(
            peripheral.count_ops(|op| matches!(
                op,
                GattOp::WriteDescriptor { descriptor, value, .. }
                    if *descriptor == CLIENT_CHARACTERISTIC_CONFIG
                        && value.as_slice() == &ENABLE_INDICATION_VALUE[..]
            )),
            1
        );
    }

    /// AbortHandle 在等待确认期间取消 start
    #[tokio::test(start_paused = true)]
    async fn test_abort_cancels_subscription_wait() {
        let bp = single(ModeKind::Notification, true);
        let mut config = MockConfig::default().with_characteristic(ACC, true);
        config.stall_descriptor_writes = true;
        let mut input = input_with(&bp, MockGattClient::with_config(config));
        input.connect(&HashMap::new()).await.unwrap();

        let abort = input.abort_handle();
        let aborter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            abort.abort();
        });

        let started = tokio::time::Instant::now();
        assert!(matches!(
            input.start().await,
            Err(ContractError::NotificationSetup { .. })
        ));
        assert!(started.elapsed() < ingestion::SUBSCRIBE_TIMEOUT);
        aborter.await.unwrap();

        input.close_connection().await;
        input.close_connection().await;
        assert_eq!(input.state(), InputState::Disconnected);
    }

    /// 单个通道转换失败只影响该通道
    #[tokio::test(start_paused = true)]
    async fn test_nan_channel_keeps_siblings() {
        let bp = blueprint(
            ModeKind::Notification,
            0.0,
            false,
            vec![characteristic(ACC, &[(0, f32_at(0)), (1, f32_at(16))], Some(2))],
            &["x", "beyond_payload", "t"],
        );
        let client = MockGattClient::with_config(MockConfig::default().with_characteristic(ACC, true));
        let peripheral = client.peripheral();
        let mut input = input_with(&bp, client);

        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();
        assert!(peripheral.emit(ACC));
        assert!(peripheral.emit(ACC));
        settle().await;

        assert_eq!(values(&input, 0), vec![0.0, 1.0]);
        let broken = values(&input, 1);
        assert_eq!(broken.len(), 2);
        assert!(broken.iter().all(|v| v.is_nan()));
        assert_eq!(values(&input, 2).len(), 2);

        let metrics = input.metrics();
        assert_eq!(metrics.rows_appended, 2);
        assert_eq!(metrics.nan_values, 2);
        assert_eq!(metrics.conversion_failures, 2);
        input.close_connection().await;
    }

    /// 关闭写入无响应：stop 只等待一次退订超时，错误被忽略
    #[tokio::test(start_paused = true)]
    async fn test_stalled_unsubscribe_waits_one_timeout() {
        let bp = single(ModeKind::Notification, true);
        let mut config = MockConfig::default().with_characteristic(ACC, true);
        config.stall_disable_writes = true;
        let client = MockGattClient::with_config(config);
        let peripheral = client.peripheral();
        let mut input = input_with(&bp, client);

        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();

        let started = tokio::time::Instant::now();
        input.stop().await;
        let waited = started.elapsed();
        assert!(waited >= ingestion::UNSUBSCRIBE_TIMEOUT);
        assert!(waited < ingestion::UNSUBSCRIBE_TIMEOUT + Duration::from_millis(500));
        assert_eq!(input.state(), InputState::Connected);
        assert!(!input.is_running());
        // 关闭写入仍在执行，通知标志不再排队等待
        assert_eq!(
            peripheral.count_ops(|op| matches!(op, GattOp::SetNotify { enabled: false, .. })),
            0
        );

        input.close_connection().await;
        assert_eq!(input.state(), InputState::Disconnected);
        assert!(!peripheral.is_connected());
    }

    /// 第二个特征值订阅失败：已订阅的第一个被撤销
    #[tokio::test(start_paused = true)]
    async fn test_partial_subscription_reverted() {
        let bp = blueprint(
            ModeKind::Notification,
            0.0,
            true,
            vec![
                characteristic(ACC, &[(0, f32_at(0))], Some(2)),
                characteristic(GYRO, &[(1, f32_at(0))], Some(2)),
            ],
            &["acc", "gyro", "t"],
        );
        let mut config = MockConfig::default()
            .with_characteristic(ACC, true)
            .with_characteristic(GYRO, true);
        config.failing_notify = vec![GYRO];
        let client = MockGattClient::with_config(config);
        let peripheral = client.peripheral();
        let mut input = input_with(&bp, client);

        input.connect(&HashMap::new()).await.unwrap();
        match input.start().await {
            Err(ContractError::NotificationSetup { characteristic, .. }) => {
                assert_eq!(characteristic, GYRO.to_string())
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(!peripheral.notify_enabled(&ACC));
        assert_eq!(peripheral.cccd_value(&ACC), Some(DISABLE_VALUE.to_vec()));
        assert_eq!(input.state(), InputState::Connected);
        assert!(!input.is_running());
        input.close_connection().await;
    }
}

#[cfg(test)]
mod session_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use contracts::ModeKind;
    use gatt_link::{GattOp, MockConfig, MockGattClient};
    use ingestion::InputState;

    use crate::support::*;

    fn notify_blueprint() -> contracts::AcquisitionBlueprint {
        blueprint(
            ModeKind::Notification,
            0.0,
            false,
            vec![characteristic(ACC, &[(0, f32_at(0))], Some(1))],
            &["x", "t"],
        )
    }

    fn client() -> MockGattClient {
        MockGattClient::with_config(MockConfig::default().with_characteristic(ACC, true))
    }

    /// 断线暂停后重连恢复：t0 不变，时间单调递增
    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_keeps_time_monotonic() {
        let bp = notify_blueprint();
        let client = client();
        let peripheral = client.peripheral();
        let mut input = input_with(&bp, client);

        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();
        for _ in 0..3 {
            peripheral.emit(ACC);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let t0 = input.t0();
        assert!(t0.is_some());

        peripheral.drop_link();
        settle().await;
        assert!(input.is_link_lost());
        assert!(input.is_running());
        assert!(!peripheral.emit(ACC));

        tokio::time::sleep(Duration::from_millis(500)).await;
        input.close_connection().await;
        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();
        assert!(!input.is_link_lost());
        assert_eq!(input.t0(), t0);

        for _ in 0..3 {
            peripheral.emit(ACC);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let t = values(&input, 1);
        assert_eq!(t.len(), 6);
        assert!(t.windows(2).all(|p| p[1] > p[0]), "t = {t:?}");
        // the pause shows up as a gap
        assert!(t[3] - t[2] > 0.5);
        input.stop().await;
        input.close_connection().await;
    }

    /// stop 后再 start：新 t0 接续已缓冲的最大时间
    #[tokio::test(start_paused = true)]
    async fn test_restart_continues_from_buffered_time() {
        let bp = notify_blueprint();
        let client = client();
        let peripheral = client.peripheral();
        let mut input = input_with(&bp, client);

        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();
        peripheral.emit(ACC);
        tokio::time::sleep(Duration::from_millis(300)).await;
        peripheral.emit(ACC);
        settle().await;
        input.stop().await;
        let first_t0 = input.t0();

        tokio::time::sleep(Duration::from_secs(5)).await;
        input.start().await.unwrap();
        peripheral.emit(ACC);
        settle().await;

        let t = values(&input, 1);
        assert_eq!(t.len(), 3);
        assert_ne!(input.t0(), first_t0);
        assert!(t[2] >= t[1]);
        assert!(t[2] - t[1] < 0.01, "t = {t:?}");
        input.close_connection().await;
    }

    /// 重复关闭无副作用，关闭后可重新连接
    #[tokio::test(start_paused = true)]
    async fn test_close_twice_then_reconnect() {
        let bp = notify_blueprint();
        let client = client();
        let peripheral = client.peripheral();
        let mut input = input_with(&bp, client);

        input.connect(&HashMap::new()).await.unwrap();
        input.start().await.unwrap();
        input.close_connection().await;
        input.close_connection().await;

        assert_eq!(input.state(), InputState::Disconnected);
        assert_eq!(peripheral.count_ops(|op| *op == GattOp::Disconnect), 1);
        assert!(input.queue_metrics().is_none());

        input.connect(&HashMap::new()).await.unwrap();
        assert_eq!(input.state(), InputState::Connected);
        assert!(peripheral.is_connected());
        input.close_connection().await;
    }
}
