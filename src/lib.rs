//! # rshuffledns
//!
//! 基于massdns的高吞吐子域名枚举与验证工具库。
//!
//! ## 特性
//!
//! - 🚀 **分块流式解析**: 字典排列或子域名列表按有界分块喂给massdns，磁盘峰值可控
//! - 🧹 **泛解析清洗**: 逐层随机标签探测 + 两级缓存，识别轮询型泛解析
//! - 💾 **磁盘存储**: IP到域名集合的状态落在嵌入式键值库上，大目标不爆内存
//! - ✅ **可信复核**: 可选地用可信DNS对幸存域名做第二轮验证
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use rshuffledns::{resolve_subdomains, SubdomainResolveConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = SubdomainResolveConfig {
//!         domains: vec!["example.com".to_string()],
//!         wordlist: Some("words.txt".to_string()),
//!         resolvers_file: "resolvers.txt".to_string(),
//!         ..Default::default()
//!     };
//!
//!     let resolved = resolve_subdomains(config).await?;
//!     println!("发现 {} 个有效子域名", resolved);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod dns_client;
pub mod input;
pub mod massdns;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod roundrobin;
pub mod store;
pub mod util;
pub mod wildcard;
pub mod wildcard_store;

// 主要公共API
pub use api::{
    resolve_subdomains, SubdomainResolveConfig, SubdomainResolveEngine, COUNTER_THRESHOLD,
    DEFAULT_TRUSTED_RESOLVERS,
};

// 其他有用的类型
pub use dns_client::{DnsClient, DnsQueryError};
pub use massdns::{MassdnsOutput, MassdnsRunner};
pub use pipeline::ChunkedPipeline;
pub use roundrobin::RoundRobin;
pub use store::{IpRecord, IpStore, StoreWriter};
pub use wildcard::{generate_wildcard_permutations, WildcardResolver};
pub use wildcard_store::WildcardStore;
