/// 事件分发 (Event Sink)
///
/// 采集线程只负责把事件放进两条有界队列, 真正的通知与写库在两个独立线程中完成:
/// - notifier:  尽力而为, 队列满时丢弃通知 (不影响存储)
/// - persister: 队列更大, 入队最多等待 publish_timeout, 不会无限阻塞采集线程
pub mod notifier;
pub mod store;

pub use notifier::{LogTransport, NotificationTransport, TelegramTransport};
pub use store::{EventRecord, EventStore, SqliteEventStore};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::presence::PresenceEvent;
use crate::utils::join_with_timeout;

// ========== 参数 ==========

#[derive(Clone, Debug)]
pub struct SinkConfig {
    pub notify_capacity: usize,
    pub persist_capacity: usize,
    /// 存储队列满时的最长等待
    pub publish_timeout: Duration,
    /// 消费线程每次等待的最长时间 (期间检查停止标志)
    pub poll_interval: Duration,
    /// 停止后排空队列的最长时间
    pub drain_timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for SinkConfig {
    fn from(cfg: &RuntimeConfig) -> Self {
        Self {
            notify_capacity: cfg.notify_queue_capacity.max(1),
            persist_capacity: cfg.persist_queue_capacity.max(1),
            publish_timeout: cfg.publish_timeout(),
            poll_interval: cfg.consumer_poll(),
            drain_timeout: cfg.drain_timeout(),
        }
    }
}

// ========== 统计 ==========

#[derive(Debug, Default)]
struct SinkCounters {
    published: AtomicU64,
    notify_dropped: AtomicU64,
    delivered: AtomicU64,
    notify_failed: AtomicU64,
    persist_dropped: AtomicU64,
    persisted: AtomicU64,
    persist_failed: AtomicU64,
}

impl SinkCounters {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SinkStats {
        SinkStats {
            published: self.published.load(Ordering::Relaxed),
            notify_dropped: self.notify_dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            notify_failed: self.notify_failed.load(Ordering::Relaxed),
            persist_dropped: self.persist_dropped.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failed: self.persist_failed.load(Ordering::Relaxed),
        }
    }
}

/// 事件分发统计
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// 发布的事件总数
    pub published: u64,
    /// 通知队列满而丢弃的通知
    pub notify_dropped: u64,
    pub delivered: u64,
    pub notify_failed: u64,
    /// 存储队列在超时内仍满而丢弃的事件
    pub persist_dropped: u64,
    pub persisted: u64,
    pub persist_failed: u64,
}

/// 关闭结果
#[derive(Clone, Debug, Serialize)]
pub struct SinkReport {
    pub stats: SinkStats,
    /// 两个消费线程是否在期限内退出
    pub notifier_exited: bool,
    pub persister_exited: bool,
}

// ========== 发布端 ==========

/// 事件发布端 (每个采集线程持有一份克隆)
#[derive(Clone)]
pub struct EventPublisher {
    notify_tx: Sender<PresenceEvent>,
    persist_tx: Sender<PresenceEvent>,
    publish_timeout: Duration,
    counters: Arc<SinkCounters>,
}

impl EventPublisher {
    /// 发布一个事件, 最多阻塞 publish_timeout
    pub fn publish(&self, event: &PresenceEvent) {
        SinkCounters::inc(&self.counters.published);

        match self.notify_tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                SinkCounters::inc(&self.counters.notify_dropped);
                warn!("⚠️ 通知队列已满, 丢弃通知: {}", event);
            }
            Err(TrySendError::Disconnected(_)) => {
                SinkCounters::inc(&self.counters.notify_dropped);
                debug!("通知线程已退出, 丢弃通知: {}", event);
            }
        }

        match self
            .persist_tx
            .send_timeout(event.clone(), self.publish_timeout)
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                SinkCounters::inc(&self.counters.persist_dropped);
                error!(
                    "❌ 存储队列 {:?} 内仍满, 事件未记录: {}",
                    self.publish_timeout, event
                );
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                SinkCounters::inc(&self.counters.persist_dropped);
                warn!("存储线程已退出, 事件未记录: {}", event);
            }
        }
    }

    pub fn stats(&self) -> SinkStats {
        self.counters.snapshot()
    }
}

// ========== 消费端 ==========

/// 事件分发器: 持有 notifier / persister 两个线程
pub struct EventSink {
    publisher: EventPublisher,
    stop: Arc<AtomicBool>,
    notifier: Option<JoinHandle<()>>,
    persister: Option<JoinHandle<()>>,
    config: SinkConfig,
}

impl EventSink {
    /// 创建队列并启动两个消费线程
    pub fn start(
        transport: Box<dyn NotificationTransport>,
        store: Arc<dyn EventStore>,
        config: SinkConfig,
    ) -> Result<Self> {
        let (notify_tx, notify_rx) = crossbeam_channel::bounded(config.notify_capacity.max(1));
        let (persist_tx, persist_rx) = crossbeam_channel::bounded(config.persist_capacity.max(1));
        let counters = Arc::new(SinkCounters::default());
        let stop = Arc::new(AtomicBool::new(false));

        let notifier = {
            let counters = counters.clone();
            let stop = stop.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("notifier".to_string())
                .spawn(move || {
                    info!("📣 通知线程启动 ({})", transport.name());
                    consume(&notify_rx, &stop, &config, |event| {
                        match transport.send(&event.message()) {
                            Ok(()) => SinkCounters::inc(&counters.delivered),
                            Err(e) => {
                                SinkCounters::inc(&counters.notify_failed);
                                warn!("通知发送失败: {} ({})", e, event);
                            }
                        }
                    });
                    info!("📣 通知线程退出");
                })?
        };

        let persister = {
            let counters = counters.clone();
            let stop = stop.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("persister".to_string())
                .spawn(move || {
                    info!("💾 存储线程启动");
                    consume(&persist_rx, &stop, &config, |event| {
                        match store.append(&event) {
                            Ok(()) => SinkCounters::inc(&counters.persisted),
                            Err(e) => {
                                SinkCounters::inc(&counters.persist_failed);
                                error!("❌ 事件写入失败: {} ({})", e, event);
                            }
                        }
                    });
                    info!("💾 存储线程退出");
                })?
        };

        Ok(Self {
            publisher: EventPublisher {
                notify_tx,
                persist_tx,
                publish_timeout: config.publish_timeout,
                counters,
            },
            stop,
            notifier: Some(notifier),
            persister: Some(persister),
            config,
        })
    }

    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    pub fn stats(&self) -> SinkStats {
        self.publisher.stats()
    }

    /// 停止两个消费线程
    ///
    /// 消费线程会在 drain_timeout 内尽量处理完已入队的事件;
    /// 这里最多再多等一个轮询周期加一秒, 超时则放弃等待.
    pub fn shutdown(mut self) -> SinkReport {
        self.stop.store(true, Ordering::Release);

        let grace = self.config.drain_timeout + self.config.poll_interval + Duration::from_secs(1);
        let deadline = Instant::now() + grace;

        let notifier_exited = wait_consumer(self.notifier.take(), "notifier", deadline);
        let persister_exited = wait_consumer(self.persister.take(), "persister", deadline);

        SinkReport {
            stats: self.publisher.stats(),
            notifier_exited,
            persister_exited,
        }
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn wait_consumer(handle: Option<JoinHandle<()>>, name: &str, deadline: Instant) -> bool {
    let Some(handle) = handle else {
        return true;
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    match join_with_timeout(handle, remaining) {
        Ok(Some(())) => true,
        Ok(None) => {
            error!("{} 线程异常退出", name);
            true
        }
        Err(_detached) => {
            warn!("⚠️ {} 线程未在期限内退出, 放弃等待", name);
            false
        }
    }
}

/// 消费循环: 等待事件直到收到停止信号, 然后在期限内排空队列
fn consume(
    rx: &Receiver<PresenceEvent>,
    stop: &AtomicBool,
    config: &SinkConfig,
    mut handle: impl FnMut(PresenceEvent),
) {
    while !stop.load(Ordering::Acquire) {
        match rx.recv_timeout(config.poll_interval) {
            Ok(event) => handle(event),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }

    let deadline = Instant::now() + config.drain_timeout;
    let mut drained = 0usize;
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(event) => {
                handle(event);
                drained += 1;
            }
            Err(_) => break,
        }
    }

    let remaining = rx.len();
    if remaining > 0 {
        warn!("⚠️ 排空超时, {} 个事件未处理", remaining);
    } else if drained > 0 {
        debug!("排空完成, 处理了 {} 个事件", drained);
    }
}
