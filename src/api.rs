use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use publicsuffix::{List, Psl};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::dns_client::DnsClient;
use crate::massdns::MassdnsRunner;
use crate::output;
use crate::pipeline::ChunkedPipeline;
use crate::roundrobin::load_resolvers_from_file;
use crate::store::{IpStore, StoreWriter};
use crate::util::is_blank_file;
use crate::wildcard::WildcardResolver;
use crate::wildcard_store::WildcardStore;

/// IP观测次数达到该阈值才值得花探测流量做泛解析判定
pub const COUNTER_THRESHOLD: u64 = 5;

/// 未配置可信DNS文件时判定器使用的内置可信服务器
pub const DEFAULT_TRUSTED_RESOLVERS: [&str; 4] = [
    "8.8.8.8:53",
    "8.8.4.4:53",
    "1.1.1.1:53",
    "1.0.0.1:53",
];

/// 子域名解析配置
#[derive(Debug, Clone)]
pub struct SubdomainResolveConfig {
    /// 目标根域名列表，为空时泛解析过滤不启用
    pub domains: Vec<String>,
    /// 暴破字典文件路径
    pub wordlist: Option<String>,
    /// 待解析的子域名列表文件路径
    pub subdomains_list: Option<String>,
    /// 已有的massdns输出文件，只做过滤不再执行massdns
    pub massdns_raw: Option<String>,
    /// massdns使用的DNS服务器文件
    pub resolvers_file: String,
    /// 可信DNS服务器文件，配置后输出前逐个复核
    pub trusted_resolvers: Option<String>,
    /// massdns二进制路径，缺省时在常见位置查找
    pub massdns_path: Option<String>,
    /// 透传给massdns的额外命令行参数
    pub massdns_cmd: Option<String>,
    /// 输出文件路径
    pub output_file: Option<String>,
    /// 以ndjson格式输出
    pub json: bool,
    /// massdns并发度
    pub threads: usize,
    /// 泛解析判定并发度
    pub wildcard_threads: usize,
    /// 跳过观测次数阈值，对所有域名做泛解析判定
    pub strict_wildcard: bool,
    /// DNS查询尝试次数
    pub retries: usize,
    /// 每个分块的待解析条数
    pub batch_size: usize,
    /// 保留massdns的标准错误输出
    pub keep_stderr: bool,
    /// 入库时过滤内网IP
    pub filter_internal_ips: bool,
    /// 用公共后缀列表从结果里自动提取根域名
    pub auto_extract_root_domains: bool,
    /// 临时文件目录，缺省用系统临时目录
    pub temp_dir: Option<String>,
    /// 运行结束后把泛解析IP集合存到该文件
    pub wildcard_output_file: Option<String>,
    /// 运行前从该文件预载已知的泛解析IP
    pub wildcard_input_file: Option<String>,
}

impl Default for SubdomainResolveConfig {
    fn default() -> Self {
        SubdomainResolveConfig {
            domains: Vec::new(),
            wordlist: None,
            subdomains_list: None,
            massdns_raw: None,
            resolvers_file: String::new(),
            trusted_resolvers: None,
            massdns_path: None,
            massdns_cmd: None,
            output_file: None,
            json: false,
            threads: 10_000,
            wildcard_threads: 25,
            strict_wildcard: false,
            retries: 5,
            batch_size: 100_000,
            keep_stderr: false,
            filter_internal_ips: false,
            auto_extract_root_domains: false,
            temp_dir: None,
            wildcard_output_file: None,
            wildcard_input_file: None,
        }
    }
}

/// 子域名解析引擎
///
/// 串起整条流水线：输入分块解析入库、泛解析判定清理、结果输出。
pub struct SubdomainResolveEngine {
    config: SubdomainResolveConfig,
    store: Arc<IpStore>,
    wildcard_resolver: Arc<WildcardResolver>,
    wildcard_store: Arc<WildcardStore>,
    trusted_client: Option<Arc<DnsClient>>,
    temp_dir: TempDir,
    cancel: CancellationToken,
}

impl SubdomainResolveEngine {
    /// 创建引擎，校验基本配置并准备好所有组件
    pub async fn new(
        config: SubdomainResolveConfig,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        if config.resolvers_file.is_empty() {
            return Err("未提供DNS服务器列表".into());
        }
        let resolvers_path = Path::new(&config.resolvers_file);
        if !resolvers_path.exists() {
            return Err("DNS服务器文件不存在".into());
        }
        if is_blank_file(resolvers_path)? {
            return Err("DNS服务器文件为空".into());
        }

        let temp_parent = config
            .temp_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let temp_dir = tempfile::Builder::new()
            .prefix("rshuffledns-")
            .tempdir_in(&temp_parent)
            .map_err(|e| format!("无法创建临时目录: {}", e))?;

        let store = Arc::new(IpStore::new(temp_dir.path())?);

        // 判定器永远走可信DNS，输出复核只在用户显式配置时启用
        let trusted_servers = match &config.trusted_resolvers {
            Some(path) => load_resolvers_from_file(Path::new(path))?,
            None => DEFAULT_TRUSTED_RESOLVERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        let classifier_client = Arc::new(DnsClient::new(trusted_servers, config.retries)?);
        let trusted_client = config
            .trusted_resolvers
            .is_some()
            .then(|| classifier_client.clone());

        let wildcard_resolver = Arc::new(WildcardResolver::new(
            config.domains.clone(),
            classifier_client,
        ));

        let wildcard_store = Arc::new(WildcardStore::new());
        if let Some(path) = &config.wildcard_input_file {
            wildcard_store.load_from_file(Path::new(path))?;
            log::info!("预载泛解析IP {} 个", wildcard_store.len());
        }

        Ok(SubdomainResolveEngine {
            config,
            store,
            wildcard_resolver,
            wildcard_store,
            trusted_client,
            temp_dir,
            cancel: CancellationToken::new(),
        })
    }

    /// 取消令牌，外部可以用它中断执行
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 已确认的泛解析IP集合
    pub fn wildcard_store(&self) -> Arc<WildcardStore> {
        self.wildcard_store.clone()
    }

    /// 执行完整流程，返回输出的域名数量
    pub async fn process(&self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        self.ingest().await?;

        if self.wildcard_resolver.domains().is_empty()
            && !self.config.auto_extract_root_domains
        {
            log::info!("未指定根域名，跳过泛解析过滤");
        } else {
            if self.config.auto_extract_root_domains {
                self.extract_root_domains()?;
            }
            log::info!("开始清除泛解析记录");
            self.filter_wildcards().await?;
            log::info!("泛解析清除完成");
        }

        if let Some(path) = &self.config.wildcard_output_file {
            match self.wildcard_store.save_to_file(Path::new(path)) {
                Ok(()) => log::info!("泛解析IP已保存到 {}", path),
                Err(e) => log::warn!("泛解析IP保存失败: {}", e),
            }
        }

        log::info!("枚举结束，开始写出结果");
        let resolved = output::write_output(
            &self.store,
            self.wildcard_store.clone(),
            self.trusted_client.clone(),
            self.config.output_file.as_deref().map(Path::new),
            self.config.json,
            self.config.wildcard_threads,
        )
        .await?;
        Ok(resolved)
    }

    /// 入库阶段：按模式驱动分块管线
    async fn ingest(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let binary = self.resolve_massdns_binary()?;
        let runner = MassdnsRunner::new(
            binary,
            PathBuf::from(&self.config.resolvers_file),
            self.config.threads,
            self.config.massdns_cmd.clone(),
            self.config.keep_stderr,
            self.temp_dir.path().to_path_buf(),
        );
        let mut pipeline = ChunkedPipeline::new(
            runner,
            self.config.batch_size,
            self.temp_dir.path().to_path_buf(),
            self.config.filter_internal_ips,
            self.cancel.clone(),
        );

        let writer = StoreWriter::new(self.store.clone());

        if let Some(raw) = &self.config.massdns_raw {
            let path = Path::new(raw);
            if is_blank_file(path)? {
                return Err("massdns原始输出文件为空".into());
            }
            log::info!("开始解析已有的massdns输出 {}", raw);
            pipeline.run_raw(path, &writer).await?;
        } else if let Some(wordlist) = &self.config.wordlist {
            let path = Path::new(wordlist);
            if is_blank_file(path)? {
                return Err("字典文件为空".into());
            }
            log::info!(
                "开始暴破，字典 {}，目标域名 {:?}",
                wordlist,
                self.config.domains
            );
            let file = tokio::fs::File::open(path).await?;
            let total = pipeline
                .run_wordlist(
                    tokio::io::BufReader::new(file),
                    &self.config.domains,
                    &writer,
                )
                .await?;
            log::info!("暴破完成，共发出 {} 条排列", total);
        } else if let Some(list) = &self.config.subdomains_list {
            let path = Path::new(list);
            if is_blank_file(path)? {
                return Err("子域名列表文件为空".into());
            }
            log::info!("开始解析子域名列表 {}", list);
            let file = tokio::fs::File::open(path).await?;
            let total = pipeline
                .run_hosts(tokio::io::BufReader::new(file), &writer)
                .await?;
            log::info!("解析完成，共 {} 条", total);
        } else {
            return Err("未提供输入，需要字典、子域名列表或massdns原始输出".into());
        }

        // 关闭写入器，等待最后一批落盘
        writer.close().await?;
        log::info!("massdns输出解析完成");
        Ok(())
    }

    fn resolve_massdns_binary(&self) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
        match &self.config.massdns_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => match MassdnsRunner::find_binary() {
                Some(path) => Ok(path),
                // 原始模式不会真正执行massdns
                None if self.config.massdns_raw.is_some() => Ok(PathBuf::from("massdns")),
                None => Err("未找到massdns二进制，请通过massdns_path指定".into()),
            },
        }
    }

    /// 用公共后缀列表从存储里的域名提取可注册域名，并入根域名集合
    fn extract_root_domains(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let list = List::new();
        let mut roots: HashSet<String> = HashSet::new();

        self.store.iterate(|_, hostnames, _| {
            for hostname in hostnames {
                // 识别不出公共后缀的域名静默跳过
                if let Some(domain) = list.domain(hostname.as_bytes()) {
                    let root = String::from_utf8_lossy(domain.as_bytes()).to_string();
                    roots.insert(root);
                }
            }
        })?;

        if !roots.is_empty() {
            log::info!("自动提取根域名 {} 个", roots.len());
            let roots: Vec<String> = roots.into_iter().collect();
            self.wildcard_resolver.add_domains(&roots);
        }
        Ok(())
    }

    /// 泛解析判定与清理
    async fn filter_wildcards(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // 从存储构建 域名 -> 观测IP列表 和 域名 -> 最大counter
        let mut host_ips: HashMap<String, Vec<String>> = HashMap::new();
        let mut host_counter: HashMap<String, u64> = HashMap::new();
        self.store.iterate(|ip, hostnames, counter| {
            for hostname in hostnames {
                host_ips
                    .entry(hostname.clone())
                    .or_default()
                    .push(ip.to_string());
                let max = host_counter.entry(hostname.clone()).or_insert(0);
                if counter > *max {
                    *max = counter;
                }
            }
        })?;

        let semaphore = Arc::new(Semaphore::new(self.config.wildcard_threads.max(1)));
        let mut tasks = Vec::new();
        let mut scheduled = 0usize;

        for (hostname, ips) in host_ips {
            // 任一观测IP已经在泛解析集合里，域名间接污染，不再花探测流量
            if ips.iter().any(|ip| self.wildcard_store.has(ip)) {
                continue;
            }

            let counter = host_counter.get(&hostname).copied().unwrap_or(0);
            if counter < COUNTER_THRESHOLD && !self.config.strict_wildcard {
                continue;
            }

            scheduled += 1;
            let resolver = self.wildcard_resolver.clone();
            let wildcards = self.wildcard_store.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();

            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }

                let (is_wildcard, wildcard_ips) = resolver.lookup_host(&hostname, &ips).await;
                for ip in &wildcard_ips {
                    wildcards.set(ip);
                }
                if is_wildcard {
                    // 该域名至少一次解析到了泛解析地址，观测到的IP一并标记
                    for ip in &ips {
                        wildcards.set(ip);
                    }
                }
            }));
        }

        log::info!("泛解析判定任务 {} 个", scheduled);
        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("泛解析判定任务异常: {}", e);
            }
        }

        // 本次标记的IP和判定器缓存攒下的IP取并集，一次遍历清除
        let mut purge = self.wildcard_store.snapshot();
        purge.extend(self.wildcard_resolver.get_all_wildcard_ips());

        let mut removed = 0usize;
        for ip in &purge {
            match self.store.delete(ip) {
                Ok(()) => removed += 1,
                // 清理失败只记录，不中断整个运行
                Err(e) => log::warn!("清除IP {} 失败: {}", ip, e),
            }
        }
        log::info!("清除泛解析IP {} 个", removed);
        Ok(())
    }
}

/// 便捷入口：按配置跑完整个流程
pub async fn resolve_subdomains(
    config: SubdomainResolveConfig,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let engine = SubdomainResolveEngine::new(config).await?;
    engine.process().await
}
