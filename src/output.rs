use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::dns_client::DnsClient;
use crate::store::IpStore;
use crate::wildcard_store::WildcardStore;

type OutputError = Box<dyn std::error::Error + Send + Sync>;

/// 结果落地端
///
/// 标准输出始终写，配置了输出文件时同时写文件。
/// 文件句柄被互斥锁保护，复核任务并发产出时逐行写入。
struct EmitSink {
    json: bool,
    file: Option<Mutex<BufWriter<File>>>,
}

impl EmitSink {
    fn new(json: bool, output_file: Option<&Path>) -> Result<Self, OutputError> {
        let file = match output_file {
            Some(path) => {
                let file = File::create(path)
                    .map_err(|e| format!("无法创建输出文件 {}: {}", path.display(), e))?;
                Some(Mutex::new(BufWriter::new(file)))
            }
            None => None,
        };
        Ok(EmitSink { json, file })
    }

    /// 输出一个域名，JSON编码失败时丢弃该条并记录日志
    fn emit(&self, hostname: &str) -> bool {
        let line = if self.json {
            match serde_json::to_string(&serde_json::json!({ "hostname": hostname })) {
                Ok(line) => line,
                Err(e) => {
                    log::error!("JSON编码失败，丢弃 {}: {}", hostname, e);
                    return false;
                }
            }
        } else {
            hostname.to_string()
        };

        println!("{}", line);

        if let Some(file) = &self.file {
            let mut writer = file.lock().unwrap();
            if let Err(e) = writeln!(writer, "{}", line) {
                log::error!("输出文件写入失败: {}", e);
            }
        }
        true
    }

    fn flush(&self) -> Result<(), OutputError> {
        if let Some(file) = &self.file {
            file.lock().unwrap().flush()?;
        }
        Ok(())
    }
}

/// 输出过滤后的最终结果
///
/// 遍历存储并把域名跨IP去重。配置了可信DNS时逐个复核：
/// 查询失败、无A记录或任一应答IP命中泛解析集合的域名丢弃。
/// 返回输出的域名数量。
pub async fn write_output(
    store: &IpStore,
    wildcards: Arc<WildcardStore>,
    trusted_client: Option<Arc<DnsClient>>,
    output_file: Option<&Path>,
    json: bool,
    threads: usize,
) -> Result<usize, OutputError> {
    let mut unique: HashSet<String> = HashSet::new();
    store.iterate(|_, hostnames, _| {
        for hostname in hostnames {
            unique.insert(hostname.clone());
        }
    })?;

    let sink = Arc::new(EmitSink::new(json, output_file)?);
    let mut resolved = 0usize;

    match trusted_client {
        Some(client) => {
            log::info!("开始可信DNS复核，共 {} 个域名", unique.len());
            let semaphore = Arc::new(Semaphore::new(threads.max(1)));

            let mut tasks = Vec::new();
            for hostname in unique {
                let semaphore = semaphore.clone();
                let client = client.clone();
                let wildcards = wildcards.clone();
                let sink = sink.clone();

                tasks.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.ok()?;
                    match client.lookup_a(&hostname).await {
                        Ok(ips) if !ips.is_empty() => {
                            // 复核结果再次命中泛解析IP的同样丢弃
                            if ips.iter().any(|ip| wildcards.has(ip)) {
                                log::debug!("域名 {} 复核命中泛解析IP，丢弃", hostname);
                                return None;
                            }
                            sink.emit(&hostname).then_some(())
                        }
                        Ok(_) => None,
                        Err(e) => {
                            log::debug!("域名 {} 可信复核失败，丢弃: {}", hostname, e);
                            None
                        }
                    }
                }));
            }

            for task in tasks {
                if let Ok(Some(())) = task.await {
                    resolved += 1;
                }
            }
        }
        None => {
            for hostname in unique {
                if sink.emit(&hostname) {
                    resolved += 1;
                }
            }
        }
    }

    sink.flush()?;
    log::info!("共解析出 {} 个有效域名", resolved);
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store(dir: &Path) -> IpStore {
        let store = IpStore::new(dir).unwrap();
        store
            .append(
                "1.2.3.4",
                &["a.example.com".to_string(), "b.example.com".to_string()],
            )
            .unwrap();
        // 同一个域名挂在两个IP上，输出要去重
        store
            .append("5.6.7.8", &["a.example.com".to_string()])
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_write_output_plain_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let out = dir.path().join("result.txt");

        let count = write_output(
            &store,
            Arc::new(WildcardStore::new()),
            None,
            Some(&out),
            false,
            25,
        )
        .await
        .unwrap();
        assert_eq!(count, 2);

        let data = std::fs::read_to_string(&out).unwrap();
        let mut lines: Vec<&str> = data.lines().collect();
        lines.sort_unstable();
        assert_eq!(lines, vec!["a.example.com", "b.example.com"]);
    }

    #[tokio::test]
    async fn test_write_output_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        let out = dir.path().join("result.json");

        let count = write_output(
            &store,
            Arc::new(WildcardStore::new()),
            None,
            Some(&out),
            true,
            25,
        )
        .await
        .unwrap();
        assert_eq!(count, 2);

        let data = std::fs::read_to_string(&out).unwrap();
        for line in data.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value["hostname"].as_str().unwrap().ends_with("example.com"));
        }
    }

    #[tokio::test]
    async fn test_write_output_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let count = write_output(
            &store,
            Arc::new(WildcardStore::new()),
            None,
            None,
            false,
            25,
        )
        .await
        .unwrap();
        assert_eq!(count, 2);
    }
}
