use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// DNS服务器轮询池
///
/// 持有一个有序的 ip:port 列表和一个单调递增的计数器，
/// next() 按计数器取模轮流返回每个服务器。
#[derive(Debug)]
pub struct RoundRobin {
    items: Vec<String>,
    next: AtomicUsize,
}

impl RoundRobin {
    /// 创建轮询池，空列表视为配置错误
    pub fn new(items: Vec<String>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        if items.is_empty() {
            return Err("DNS服务器列表为空".into());
        }
        Ok(RoundRobin {
            items,
            next: AtomicUsize::new(0),
        })
    }

    /// 轮询返回下一个服务器
    pub fn next(&self) -> &str {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        &self.items[n % self.items.len()]
    }

    /// 服务器数量
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 是否为空（new保证非空，保留以对齐集合接口）
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 所有服务器
    pub fn servers(&self) -> &[String] {
        &self.items
    }
}

/// 从文件加载DNS服务器列表
///
/// 每行一个 `ip` 或 `ip:port`，空行跳过，缺省端口补 :53。
pub fn load_resolvers_from_file(
    path: &Path,
) -> Result<Vec<String>, Box<dyn std::error::Error + Send + Sync>> {
    let file = File::open(path)
        .map_err(|e| format!("无法打开DNS服务器文件 {}: {}", path.display(), e))?;
    let reader = BufReader::new(file);

    let mut servers = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        servers.push(with_default_port(text));
    }
    Ok(servers)
}

/// 缺省端口时补上 :53
pub fn with_default_port(server: &str) -> String {
    if server.contains(':') {
        server.to_string()
    } else {
        format!("{}:53", server)
    }
}
