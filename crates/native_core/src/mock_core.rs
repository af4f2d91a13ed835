//! Mock 原生核心
//!
//! 进程内模拟的流表集群，用于单元测试和 CLI 模拟运行，支持注入故障场景：
//! 站点不可达、强制断开连接、认证失败。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use contracts::{Credentials, RawRowBatch, Row, SiteAddr, TableSchema, Value};
use tracing::{debug, instrument};

use crate::client::{ConnectionHandle, NativeCore, ReceiveOutcome, SubscribeParams};
use crate::error::{CoreError, Result};

/// Mock 核心配置
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// 启动时即不可达的站点
    pub unreachable_sites: Vec<SiteAddr>,
    /// 要求的登录凭据（None 表示不校验）
    pub required_credentials: Option<Credentials>,
    /// 单次 receive 返回的最大行数
    pub max_batch_rows: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            unreachable_sites: Vec::new(),
            required_credentials: None,
            max_batch_rows: 1024,
        }
    }
}

/// 已记录的订阅请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRecord {
    pub site: SiteAddr,
    pub table: String,
    pub action: String,
    /// 请求的 offset
    pub requested: i64,
    /// 解析后的起始 offset
    pub resolved: i64,
}

struct StreamTable {
    columns: Arc<[String]>,
    rows: Vec<Row>,
}

struct Connection {
    site: SiteAddr,
    table: Option<String>,
    cursor: i64,
    filter: Option<Vec<Value>>,
    broken: bool,
}

#[derive(Default)]
struct ClusterState {
    down_sites: HashSet<SiteAddr>,
    tables: HashMap<String, StreamTable>,
    schemas: HashMap<(String, String), TableSchema>,
    connections: HashMap<u64, Connection>,
    connect_log: Vec<SiteAddr>,
    subscribe_log: Vec<SubscribeRecord>,
    unsubscribe_log: Vec<(SiteAddr, String, String)>,
}

/// Mock 原生核心
///
/// 所有站点共享同一份流表数据（模拟高可用副本），因此故障切换后
/// 可以从相同的 offset 继续订阅。
pub struct MockNativeCore {
    /// 配置（可注入失败场景）
    config: MockConfig,
    /// 连接 ID 计数器
    next_conn_id: AtomicU64,
    /// 集群状态
    state: Mutex<ClusterState>,
    /// 数据发布或站点变化时唤醒等待中的 receive
    changed: Condvar,
}

impl MockNativeCore {
    /// 创建默认 mock 核心
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    /// 使用配置创建 mock 核心
    pub fn with_config(config: MockConfig) -> Self {
        let state = ClusterState {
            down_sites: config.unreachable_sites.iter().cloned().collect(),
            ..Default::default()
        };
        Self {
            config,
            next_conn_id: AtomicU64::new(1),
            state: Mutex::new(state),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 创建流表（已存在则保留数据）
    pub fn create_table(&self, table: &str, columns: &[&str]) {
        let mut state = self.lock();
        state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| StreamTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            });
        state.schemas.insert(
            (String::new(), table.to_string()),
            TableSchema::new("", table, columns),
        );
    }

    /// 注册反序列化目标表结构
    pub fn register_schema(&self, schema: TableSchema) {
        self.lock()
            .schemas
            .insert((schema.namespace.clone(), schema.table.clone()), schema);
    }

    /// 发布一行，返回其 offset
    ///
    /// 表不存在时自动创建，列名为 `c0..cn`
    pub fn publish(&self, table: &str, row: Row) -> i64 {
        let mut state = self.lock();
        let entry = state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| StreamTable {
                columns: (0..row.len()).map(|i| format!("c{i}")).collect(),
                rows: Vec::new(),
            });
        entry.rows.push(row);
        let offset = entry.rows.len() as i64 - 1;
        drop(state);
        self.changed.notify_all();
        offset
    }

    /// 批量发布，返回第一行的 offset
    pub fn publish_all(&self, table: &str, rows: impl IntoIterator<Item = Row>) -> i64 {
        let mut first = None;
        for row in rows {
            let offset = self.publish(table, row);
            first.get_or_insert(offset);
        }
        first.unwrap_or_else(|| self.table_len(table) as i64)
    }

    /// 当前流表行数
    pub fn table_len(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// 设置站点可达性；下线时断开该站点上的全部连接
    pub fn set_site_down(&self, site: &SiteAddr, down: bool) {
        let mut state = self.lock();
        if down {
            state.down_sites.insert(site.clone());
            for conn in state.connections.values_mut() {
                if &conn.site == site {
                    conn.broken = true;
                }
            }
        } else {
            state.down_sites.remove(site);
        }
        drop(state);
        self.changed.notify_all();
    }

    /// 强制断开站点上的连接，站点本身保持可达
    pub fn drop_connections(&self, site: &SiteAddr) {
        let mut state = self.lock();
        for conn in state.connections.values_mut() {
            if &conn.site == site {
                conn.broken = true;
            }
        }
        drop(state);
        self.changed.notify_all();
    }

    /// 所有 connect 尝试（包括失败的），按时间顺序
    pub fn connect_attempts(&self) -> Vec<SiteAddr> {
        self.lock().connect_log.clone()
    }

    /// 所有成功的订阅请求
    pub fn subscribe_requests(&self) -> Vec<SubscribeRecord> {
        self.lock().subscribe_log.clone()
    }

    /// 所有取消订阅请求
    pub fn unsubscribe_requests(&self) -> Vec<(SiteAddr, String, String)> {
        self.lock().unsubscribe_log.clone()
    }

    /// 当前打开的连接数
    pub fn open_connections(&self) -> usize {
        self.lock().connections.len()
    }

    fn check_credentials(&self, credentials: Option<&Credentials>) -> Result<()> {
        match (&self.config.required_credentials, credentials) {
            (None, _) => Ok(()),
            (Some(required), Some(given)) if required == given => Ok(()),
            (Some(_), given) => Err(CoreError::AuthenticationFailed {
                user: given.map(|c| c.user.clone()).unwrap_or_default(),
            }),
        }
    }

    /// 从 cursor 开始取一段连续且满足 filter 的行
    fn take_rows(&self, conn: &mut Connection, table: &StreamTable) -> Option<RawRowBatch> {
        let len = table.rows.len() as i64;
        let matches = |row: &Row| match &conn.filter {
            None => true,
            Some(values) => row.first().is_some_and(|v| values.contains(v)),
        };

        while conn.cursor < len && !matches(&table.rows[conn.cursor as usize]) {
            conn.cursor += 1;
        }
        if conn.cursor >= len {
            return None;
        }

        let start = conn.cursor;
        let mut rows = Vec::new();
        while conn.cursor < len && rows.len() < self.config.max_batch_rows {
            let row = &table.rows[conn.cursor as usize];
            if !matches(row) {
                break;
            }
            rows.push(row.clone());
            conn.cursor += 1;
        }
        Some(RawRowBatch {
            offset: start,
            columns: table.columns.clone(),
            rows,
        })
    }
}

impl Default for MockNativeCore {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeCore for MockNativeCore {
    #[instrument(name = "mock_core_connect", skip(self, credentials), fields(site = %site))]
    fn connect(
        &self,
        site: &SiteAddr,
        credentials: Option<&Credentials>,
    ) -> Result<ConnectionHandle> {
        let mut state = self.lock();
        state.connect_log.push(site.clone());

        if state.down_sites.contains(site) {
            return Err(CoreError::refused(site, "site unreachable"));
        }
        self.check_credentials(credentials)?;

        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        state.connections.insert(
            id,
            Connection {
                site: site.clone(),
                table: None,
                cursor: 0,
                filter: None,
                broken: false,
            },
        );
        debug!(site = %site, conn_id = id, "mock connection opened");
        Ok(ConnectionHandle::new(id, site.clone()))
    }

    #[instrument(
        name = "mock_core_subscribe",
        skip(self, params),
        fields(conn = %conn, table = %params.table, offset = params.offset)
    )]
    fn send_subscribe_request(
        &self,
        conn: &ConnectionHandle,
        params: &SubscribeParams<'_>,
    ) -> Result<i64> {
        let mut state = self.lock();
        let state = &mut *state;

        let table = state
            .tables
            .get(params.table)
            .ok_or_else(|| CoreError::subscribe_rejected(params.table, "table not found"))?;
        let len = table.rows.len() as i64;

        let resolved = match params.offset {
            -1 => len,
            o if (0..=len).contains(&o) => o,
            o => {
                return Err(CoreError::subscribe_rejected(
                    params.table,
                    format!("offset {o} out of range 0..={len}"),
                ))
            }
        };

        let connection = state
            .connections
            .get_mut(&conn.id())
            .filter(|c| !c.broken)
            .ok_or(CoreError::NotConnected { id: conn.id() })?;
        connection.table = Some(params.table.to_string());
        connection.cursor = resolved;
        connection.filter = params.filter.map(<[Value]>::to_vec);

        state.subscribe_log.push(SubscribeRecord {
            site: conn.site().clone(),
            table: params.table.to_string(),
            action: params.action.to_string(),
            requested: params.offset,
            resolved,
        });
        Ok(resolved)
    }

    fn receive_next_batch(&self, conn: &ConnectionHandle, timeout: Duration) -> ReceiveOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            let ClusterState {
                down_sites,
                tables,
                connections,
                ..
            } = &mut *state;

            let Some(connection) = connections.get_mut(&conn.id()) else {
                return ReceiveOutcome::Disconnected;
            };
            if connection.broken || down_sites.contains(&connection.site) {
                connection.broken = true;
                return ReceiveOutcome::Disconnected;
            }
            if let Some(table) = connection.table.as_ref().and_then(|t| tables.get(t)) {
                if let Some(batch) = self.take_rows(connection, table) {
                    return ReceiveOutcome::Batch(batch);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return ReceiveOutcome::Idle;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    #[instrument(name = "mock_core_unsubscribe", skip(self), fields(site = %site))]
    fn send_unsubscribe_request(&self, site: &SiteAddr, table: &str, action: &str) -> Result<()> {
        let mut state = self.lock();
        if state.down_sites.contains(site) {
            return Err(CoreError::refused(site, "site unreachable"));
        }
        state
            .unsubscribe_log
            .push((site.clone(), table.to_string(), action.to_string()));
        Ok(())
    }

    fn close(&self, conn: &ConnectionHandle) {
        // 幂等：即使不存在也直接返回
        if self.lock().connections.remove(&conn.id()).is_some() {
            debug!(conn = %conn, "mock connection closed");
        }
    }

    fn fetch_schema(
        &self,
        conn: &ConnectionHandle,
        namespace: &str,
        table: &str,
    ) -> Result<TableSchema> {
        let state = self.lock();
        if !state.connections.contains_key(&conn.id()) {
            return Err(CoreError::NotConnected { id: conn.id() });
        }
        state
            .schemas
            .get(&(namespace.to_string(), table.to_string()))
            .cloned()
            .ok_or_else(|| CoreError::SchemaNotFound {
                namespace: namespace.to_string(),
                table: table.to_string(),
            })
    }
}
