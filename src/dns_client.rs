use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

use trust_dns_resolver::config::{
    LookupIpStrategy, NameServerConfigGroup, ResolverConfig, ResolverOpts,
};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

use crate::roundrobin::RoundRobin;

/// 单次查询的超时
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// DNS查询失败的两种形态
///
/// 确定性的无记录应答不值得重试，传输层失败才换服务器重试。
#[derive(Debug)]
pub enum DnsQueryError {
    /// NXDOMAIN或无应答记录
    NoRecords,
    /// 超时、网络不可达等传输层错误
    Transport(String),
}

impl fmt::Display for DnsQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsQueryError::NoRecords => write!(f, "无解析记录"),
            DnsQueryError::Transport(msg) => write!(f, "DNS查询传输失败: {}", msg),
        }
    }
}

impl std::error::Error for DnsQueryError {}

/// 轮询多台DNS服务器的查询客户端
///
/// 每个服务器懒加载一个独立的解析器实例并缓存复用，
/// 解析器关闭了内部缓存，轮询效果不会被本地缓存掩盖。
pub struct DnsClient {
    pool: RoundRobin,
    retries: usize,
    resolvers: Mutex<HashMap<String, TokioAsyncResolver>>,
}

impl DnsClient {
    /// 创建客户端，servers为 `ip:port` 列表，retries为单次查询的总尝试次数
    pub fn new(
        servers: Vec<String>,
        retries: usize,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(DnsClient {
            pool: RoundRobin::new(servers)?,
            retries: retries.max(1),
            resolvers: Mutex::new(HashMap::new()),
        })
    }

    /// 查询A记录
    ///
    /// 传输失败时轮换下一个服务器立即重试，不做退避；
    /// 确定性的无记录应答直接返回，不消耗重试次数。
    pub async fn lookup_a(&self, host: &str) -> Result<Vec<String>, DnsQueryError> {
        let mut last_err = DnsQueryError::Transport("没有可用的DNS服务器".to_string());

        for _ in 0..self.retries {
            let server = self.pool.next().to_string();
            let resolver = self.resolver_for(&server)?;

            match resolver.lookup_ip(host).await {
                Ok(lookup) => {
                    let ips: Vec<String> = lookup
                        .iter()
                        .filter_map(|ip| match ip {
                            IpAddr::V4(v4) => Some(v4.to_string()),
                            IpAddr::V6(_) => None,
                        })
                        .collect();
                    return Ok(ips);
                }
                Err(e) => match e.kind() {
                    ResolveErrorKind::NoRecordsFound { .. } => {
                        return Err(DnsQueryError::NoRecords)
                    }
                    _ => {
                        last_err = DnsQueryError::Transport(e.to_string());
                    }
                },
            }
        }

        Err(last_err)
    }

    /// 服务器列表
    pub fn servers(&self) -> &[String] {
        self.pool.servers()
    }

    fn resolver_for(&self, server: &str) -> Result<TokioAsyncResolver, DnsQueryError> {
        let mut cache = self.resolvers.lock().unwrap();
        if let Some(resolver) = cache.get(server) {
            return Ok(resolver.clone());
        }

        let addr: SocketAddr = server.parse().map_err(|e| {
            DnsQueryError::Transport(format!("无效的DNS服务器地址 {}: {}", server, e))
        })?;

        let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
        let config = ResolverConfig::from_parts(None, Vec::new(), group);

        let mut opts = ResolverOpts::default();
        opts.timeout = QUERY_TIMEOUT;
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.use_hosts_file = false;
        opts.ip_strategy = LookupIpStrategy::Ipv4Only;

        let resolver = TokioAsyncResolver::tokio(config, opts);
        cache.insert(server.to_string(), resolver.clone());
        Ok(resolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_servers_is_error() {
        assert!(DnsClient::new(Vec::new(), 3).is_err());
    }

    #[test]
    fn test_invalid_server_address() {
        let client = DnsClient::new(vec!["not-an-address".to_string()], 3).unwrap();
        let err = client.resolver_for("not-an-address").unwrap_err();
        assert!(matches!(err, DnsQueryError::Transport(_)));
    }

    #[test]
    fn test_resolver_cache_reuse() {
        let client = DnsClient::new(vec!["8.8.8.8:53".to_string()], 3).unwrap();
        client.resolver_for("8.8.8.8:53").unwrap();
        client.resolver_for("8.8.8.8:53").unwrap();
        assert_eq!(client.resolvers.lock().unwrap().len(), 1);
    }

    // 依赖外网DNS，默认跳过
    #[tokio::test]
    #[ignore]
    async fn test_lookup_a_live() {
        let client = DnsClient::new(vec!["8.8.8.8:53".to_string()], 3).unwrap();
        let ips = client.lookup_a("www.google.com").await.unwrap();
        assert!(!ips.is_empty());
    }
}
