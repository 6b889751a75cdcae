use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// redb表：键为IP字符串，值为JSON序列化的 [`IpRecord`]
const IP_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("ip_records");

/// 批量写入器的事件容量上限
pub const WRITE_BATCH_CAPACITY: usize = 10_000;
/// 批量写入器的定时刷新间隔
pub const WRITE_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// 单个IP在枚举过程中积累的元信息
///
/// counter 记录该IP被观测到的总次数，重复域名也会计数，
/// 所以恒有 counter >= hostnames.len()。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpRecord {
    /// 解析到该IP的域名集合
    pub hostnames: HashSet<String>,
    /// 观测次数
    pub counter: u64,
}

/// IP到域名集合的磁盘存储
///
/// 大规模枚举时累计状态可能超出内存，这里落在redb上，
/// 底层目录是临时目录，close时整体删除。
pub struct IpStore {
    db: Database,
    dir: TempDir,
}

impl IpStore {
    /// 在 parent 下创建一个带随机后缀的存储目录并打开数据库
    pub fn new(parent: &Path) -> Result<Self, StoreError> {
        let dir = tempfile::Builder::new()
            .prefix("rshuffledns-db-")
            .tempdir_in(parent)
            .map_err(|e| format!("无法创建存储目录: {}", e))?;

        let db = Database::create(dir.path().join("ip_records.redb"))
            .map_err(|e| format!("无法创建IP存储: {}", e))?;

        // 提前建表，读事务打开不存在的表会报错
        let txn = db.begin_write()?;
        {
            let _table = txn.open_table(IP_TABLE)?;
        }
        txn.commit()?;

        Ok(IpStore { db, dir })
    }

    /// 存储目录路径
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// 判断IP是否已入库
    pub fn exists(&self, ip: &str) -> bool {
        self.get(ip).is_some()
    }

    /// 读取一个IP的记录
    pub fn get(&self, ip: &str) -> Option<IpRecord> {
        let txn = self.db.begin_read().ok()?;
        let table = txn.open_table(IP_TABLE).ok()?;
        let guard = table.get(ip).ok()??;
        serde_json::from_slice(guard.value()).ok()
    }

    /// 追加域名观测
    ///
    /// 原子的读改写：记录不存在则初始化；域名并入集合去重；
    /// counter按传入条数递增，重复域名同样计数。
    pub fn append(&self, ip: &str, hostnames: &[String]) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(IP_TABLE)?;
            let record = Self::merged_record(&table, ip, hostnames)?;
            let data = serde_json::to_vec(&record)?;
            table.insert(ip, data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// 按IP分组批量追加，整批共用一个写事务以降低写放大
    pub fn append_batch(
        &self,
        grouped: HashMap<String, Vec<String>>,
    ) -> Result<(), StoreError> {
        if grouped.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(IP_TABLE)?;
            for (ip, hostnames) in &grouped {
                let record = Self::merged_record(&table, ip, hostnames)?;
                let data = serde_json::to_vec(&record)?;
                table.insert(ip.as_str(), data.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn merged_record<T>(table: &T, ip: &str, hostnames: &[String]) -> Result<IpRecord, StoreError>
    where
        T: ReadableTable<&'static str, &'static [u8]>,
    {
        let mut record: IpRecord = match table.get(ip)? {
            // 反序列化失败按空记录处理，不让脏数据卡死整个批次
            Some(guard) => serde_json::from_slice(guard.value()).unwrap_or_default(),
            None => IpRecord::default(),
        };
        record.counter += hostnames.len() as u64;
        for hostname in hostnames {
            record.hostnames.insert(hostname.clone());
        }
        Ok(record)
    }

    /// 删除一个IP的记录
    pub fn delete(&self, ip: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(IP_TABLE)?;
            table.remove(ip)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// 遍历所有记录
    ///
    /// 在读事务快照上进行，允许遍历期间并发删除已产出的键；
    /// 不保证产出顺序对调用方有任何意义。
    pub fn iterate<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(&str, &HashSet<String>, u64),
    {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(IP_TABLE)?;
        for entry in table.iter()? {
            let (key, value) = entry?;
            let record: IpRecord = match serde_json::from_slice(value.value()) {
                Ok(record) => record,
                Err(_) => continue,
            };
            f(key.value(), &record.hostnames, record.counter);
        }
        Ok(())
    }

    /// 关闭数据库并删除底层存储目录
    pub fn close(self) -> Result<(), StoreError> {
        drop(self.db);
        self.dir.close()?;
        Ok(())
    }
}

/// 面向存储的批量写入器
///
/// 调用方把 (ip, 域名) 事件灌进有界通道，后台任务按容量或
/// 定时间隔刷新，刷新时先按IP分组再成批落库。
pub struct StoreWriter {
    tx: mpsc::Sender<(String, String)>,
    worker: JoinHandle<Result<(), StoreError>>,
}

impl StoreWriter {
    /// 启动写入任务
    pub fn new(store: Arc<IpStore>) -> Self {
        let (tx, mut rx) = mpsc::channel::<(String, String)>(WRITE_BATCH_CAPACITY);

        let worker = tokio::spawn(async move {
            let mut batch: Vec<(String, String)> = Vec::new();
            let mut ticker = tokio::time::interval(WRITE_FLUSH_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => {
                            batch.push(event);
                            if batch.len() >= WRITE_BATCH_CAPACITY {
                                Self::flush(&store, &mut batch)?;
                            }
                        }
                        // 发送端全部关闭，收尾退出
                        None => break,
                    },
                    _ = ticker.tick() => {
                        if !batch.is_empty() {
                            Self::flush(&store, &mut batch)?;
                        }
                    }
                }
            }

            Self::flush(&store, &mut batch)?;
            Ok(())
        });

        StoreWriter { tx, worker }
    }

    fn flush(store: &IpStore, batch: &mut Vec<(String, String)>) -> Result<(), StoreError> {
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for (ip, hostname) in batch.drain(..) {
            grouped.entry(ip).or_default().push(hostname);
        }
        store
            .append_batch(grouped)
            .map_err(|e| format!("IP存储写入失败: {}", e).into())
    }

    /// 写入一条观测事件，通道满时等待
    pub async fn write(&self, ip: String, hostname: String) -> Result<(), StoreError> {
        self.tx
            .send((ip, hostname))
            .await
            .map_err(|_| "存储写入任务已退出".into())
    }

    /// 用于跨线程解析回调的发送端副本
    pub fn sender(&self) -> mpsc::Sender<(String, String)> {
        self.tx.clone()
    }

    /// 关闭写入器，等待最后一次刷新落盘
    pub async fn close(self) -> Result<(), StoreError> {
        let StoreWriter { tx, worker } = self;
        drop(tx);
        worker.await.map_err(|e| format!("写入任务异常退出: {}", e))?
    }
}
