use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::dns_client::DnsClient;
use crate::util::{normalize_hostname, random_label};

/// 首次判定一个泛解析层级时的并行探测次数
pub const PROBE_COUNT: usize = 3;
/// 缓存命中但IP不相交时的补充探测次数
pub const RE_PROBE_COUNT: usize = 2;
/// 探测用随机标签长度
const PROBE_LABEL_LEN: usize = 20;

/// 一个泛解析层级的判定状态
///
/// 单个枚举同时承担正缓存和负缓存，一个层级不可能两种状态并存；
/// 判定为正常的层级在一次运行内不再改写。
#[derive(Debug, Clone)]
enum LevelState {
    /// 探测全部失败，该层不是泛解析
    Normal,
    /// 泛解析层级，历次探测攒下的应答IP，只增不减
    Wildcard(HashSet<String>),
}

/// 泛解析判定器
///
/// 对每个待判定域名逐层生成 `*.<后缀>.<根域名>` 模式并用随机标签探测。
/// 层级状态缓存在一次运行内跨任务共享，查和写都在同一把锁下进行。
pub struct WildcardResolver {
    /// 根域名集合，锚定泛解析模式的生成
    domains: RwLock<Vec<String>>,
    client: Arc<DnsClient>,
    levels: RwLock<HashMap<String, LevelState>>,
}

impl WildcardResolver {
    /// 创建判定器
    pub fn new(domains: Vec<String>, client: Arc<DnsClient>) -> Self {
        let domains = domains
            .iter()
            .map(|d| normalize_hostname(d))
            .filter(|d| !d.is_empty())
            .collect();
        WildcardResolver {
            domains: RwLock::new(domains),
            client,
            levels: RwLock::new(HashMap::new()),
        }
    }

    /// 追加根域名（根域名自动提取时使用），重复的忽略
    pub fn add_domains(&self, extra: &[String]) {
        let mut domains = self.domains.write().unwrap();
        for domain in extra {
            let domain = normalize_hostname(domain);
            if !domain.is_empty() && !domains.contains(&domain) {
                domains.push(domain);
            }
        }
    }

    /// 当前根域名集合
    pub fn domains(&self) -> Vec<String> {
        self.domains.read().unwrap().clone()
    }

    /// 判定一个域名是否被泛解析污染
    ///
    /// observed 是批量解析阶段已观测到的该域名的IP。命中时返回
    /// (true, 污染IP集合)，调用方应把集合内的IP全部清除。
    pub async fn lookup_host(&self, host: &str, observed: &[String]) -> (bool, HashSet<String>) {
        let host = normalize_hostname(host);

        let apex = match self.match_apex(&host) {
            Some(apex) => apex,
            None => {
                log::debug!("域名 {} 不属于任何根域名，跳过泛解析判定", host);
                return (false, HashSet::new());
            }
        };

        let subdomain = if host == apex {
            String::new()
        } else {
            host.strip_suffix(&format!(".{}", apex))
                .unwrap_or_default()
                .to_string()
        };
        let levels = generate_wildcard_permutations(&subdomain, &apex);

        let observed_set: HashSet<&str> = observed.iter().map(|s| s.as_str()).collect();
        // 该域名途经的所有泛解析层级攒下的IP并集
        let mut encountered: HashSet<String> = HashSet::new();

        // 从根开始逐层检查，浅层命中直接短路，深层不再探测
        for level in &levels {
            let cached = self.levels.read().unwrap().get(level).cloned();
            match cached {
                Some(LevelState::Normal) => continue,
                Some(LevelState::Wildcard(known)) => {
                    if intersects(&known, &observed_set) {
                        return (true, known);
                    }
                    // 轮询型泛解析的缓存可能还没出现过用户观测到的IP，补探一轮
                    if let Some(fresh) = self.probe(level, RE_PROBE_COUNT).await {
                        let merged = self.merge_wildcard_ips(level, fresh);
                        if intersects(&merged, &observed_set) {
                            return (true, merged);
                        }
                        encountered.extend(merged);
                    } else {
                        encountered.extend(known);
                    }
                }
                None => match self.probe(level, PROBE_COUNT).await {
                    None => {
                        // 所有探测都失败，登记为正常层级；并发任务已经写入
                        // 泛解析记录时以记录为准，不覆盖
                        self.levels
                            .write()
                            .unwrap()
                            .entry(level.clone())
                            .or_insert(LevelState::Normal);
                    }
                    Some(ips) => {
                        let merged = self.merge_wildcard_ips(level, ips);
                        if intersects(&merged, &observed_set) {
                            return (true, merged);
                        }
                        encountered.extend(merged);
                    }
                },
            }
        }

        if observed_set.iter().any(|ip| encountered.contains(*ip)) {
            return (true, encountered);
        }
        (false, HashSet::new())
    }

    /// 探测一个泛解析层级
    ///
    /// 把模式头部的 `*` 换成 n 个各不相同的高熵随机标签并行查询。
    /// 全部失败返回None表示该层正常，否则返回成功探测的应答IP并集。
    async fn probe(&self, level: &str, count: usize) -> Option<HashSet<String>> {
        let suffix = level.trim_start_matches("*.");

        // 标签必须互不相同，否则服务端缓存会掩盖轮询差异
        let mut labels: HashSet<String> = HashSet::new();
        while labels.len() < count {
            labels.insert(random_label(PROBE_LABEL_LEN));
        }

        let mut tasks = Vec::new();
        for label in labels {
            let host = format!("{}.{}", label, suffix);
            let client = self.client.clone();
            tasks.push(tokio::spawn(async move { client.lookup_a(&host).await }));
        }

        let mut ips = HashSet::new();
        for task in tasks {
            match task.await {
                Ok(Ok(answers)) => ips.extend(answers),
                // 单个探测失败可以容忍
                Ok(Err(_)) => {}
                Err(e) => log::warn!("探测任务异常: {}", e),
            }
        }

        if ips.is_empty() {
            None
        } else {
            Some(ips)
        }
    }

    /// 把新探测到的IP并入层级缓存，返回合并后的完整集合
    ///
    /// 检查和写入在同一把写锁下完成。已判定为正常的层级不改写，
    /// 新结果只参与本次判定。
    fn merge_wildcard_ips(&self, level: &str, ips: HashSet<String>) -> HashSet<String> {
        let mut cache = self.levels.write().unwrap();
        match cache
            .entry(level.to_string())
            .or_insert_with(|| LevelState::Wildcard(HashSet::new()))
        {
            LevelState::Wildcard(existing) => {
                existing.extend(ips);
                existing.clone()
            }
            LevelState::Normal => ips,
        }
    }

    /// 所有层级缓存过的泛解析IP并集
    pub fn get_all_wildcard_ips(&self) -> HashSet<String> {
        let cache = self.levels.read().unwrap();
        let mut all = HashSet::new();
        for state in cache.values() {
            if let LevelState::Wildcard(ips) = state {
                all.extend(ips.iter().cloned());
            }
        }
        all
    }

    /// 按最长后缀匹配找出域名所属的根域名
    fn match_apex(&self, host: &str) -> Option<String> {
        let domains = self.domains.read().unwrap();
        domains
            .iter()
            .filter(|apex| host == apex.as_str() || host.ends_with(&format!(".{}", apex)))
            .max_by_key(|apex| apex.len())
            .cloned()
    }
}

fn intersects(ips: &HashSet<String>, observed: &HashSet<&str>) -> bool {
    ips.iter().any(|ip| observed.contains(ip.as_str()))
}

/// 生成一个子域名的泛解析层级列表，从根开始逐层加深
///
/// `xyz.abc.test` + `example.com` 生成
/// `[*.example.com, *.test.example.com, *.abc.test.example.com]`。
pub fn generate_wildcard_permutations(subdomain: &str, apex: &str) -> Vec<String> {
    let mut levels = vec![format!("*.{}", apex)];
    if subdomain.is_empty() {
        return levels;
    }

    let tokens: Vec<&str> = subdomain.split('.').collect();
    for i in 1..tokens.len() {
        let suffix = tokens[tokens.len() - i..].join(".");
        levels.push(format!("*.{}.{}", suffix, apex));
    }
    levels
}
