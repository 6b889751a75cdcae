use std::path::Path;

use clap::Parser;

use crate::api::SubdomainResolveConfig;
use crate::util::is_blank_file;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "rshuffledns")]
#[command(version)]
#[command(about = "A massdns wrapper for enumerating valid subdomains with wildcard filtering", long_about = None, arg_required_else_help = true)]
pub struct Opts {
    /// domains to find or resolve subdomains for
    #[arg(short, long)]
    pub domain: Vec<String>,

    /// file containing list of subdomains to resolve
    #[arg(short, long)]
    pub list: Option<String>,

    /// file containing words to bruteforce for domains
    #[arg(short, long)]
    pub wordlist: Option<String>,

    /// file containing list of resolvers for massdns
    #[arg(short, long)]
    pub resolvers: Option<String>,

    /// file containing trusted resolvers, enables output re-verification
    #[arg(long)]
    pub trusted_resolvers: Option<String>,

    /// path to the massdns binary
    #[arg(long)]
    pub massdns: Option<String>,

    /// extra flags passed through to massdns
    #[arg(long)]
    pub massdns_cmd: Option<String>,

    /// validate an existing massdns output file
    #[arg(long = "raw-input")]
    pub massdns_raw: Option<String>,

    /// file to write output to (optional)
    #[arg(short, long)]
    pub output: Option<String>,

    /// make output format as ndjson
    #[arg(long)]
    pub json: bool,

    /// show only subdomains in output
    #[arg(long)]
    pub silent: bool,

    /// show verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// number of concurrent massdns resolves
    #[arg(short, long, default_value = "10000")]
    pub threads: usize,

    /// number of concurrent wildcard checks
    #[arg(long = "wt", default_value = "25")]
    pub wildcard_threads: usize,

    /// number of dns query attempts
    #[arg(long, default_value = "5")]
    pub retries: usize,

    /// number of hostnames per massdns chunk
    #[arg(long, default_value = "100000")]
    pub batch_size: usize,

    /// perform wildcard check on all found subdomains
    #[arg(long)]
    pub strict_wildcard: bool,

    /// dump wildcard ips to output file
    #[arg(long)]
    pub wildcard_output_file: Option<String>,

    /// preload known wildcard ips from file
    #[arg(long)]
    pub wildcard_input_file: Option<String>,

    /// keep massdns stderr output in error messages
    #[arg(long)]
    pub keep_stderr: bool,

    /// drop internal ips (rfc1918, loopback, link-local) from results
    #[arg(long)]
    pub filter_internal_ips: bool,

    /// auto extract root domains from results using the public suffix list
    #[arg(long)]
    pub auto_extract_root_domains: bool,

    /// temporary directory for enumeration files
    #[arg(long)]
    pub directory: Option<String>,
}

impl Opts {
    /// 校验参数组合
    ///
    /// stdin 表示是否有管道输入可以当作子域名列表。
    pub fn validate(&self, stdin: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.verbose && self.silent {
            return Err("verbose和silent模式不能同时使用".into());
        }

        let resolvers = self.resolvers.as_deref().ok_or("未提供DNS服务器列表")?;
        let path = Path::new(resolvers);
        if !path.exists() {
            return Err("DNS服务器文件不存在".into());
        }
        if is_blank_file(path)? {
            return Err("DNS服务器文件为空".into());
        }

        if self.list.is_some() && self.wordlist.is_some() {
            return Err("暴破模式和解析模式不能同时使用".into());
        }

        // 原始输出模式只做过滤，需要根域名做锚点
        if self.massdns_raw.is_some() {
            if self.domain.is_empty() {
                return Err("原始输出模式需要指定根域名".into());
            }
            return Ok(());
        }

        if self.list.is_some() || stdin {
            if self.domain.is_empty() {
                log::warn!("未指定根域名，泛解析过滤将自动关闭");
            }
            return Ok(());
        }

        if self.wordlist.is_none() {
            return Err("未提供字典或子域名列表输入".into());
        }
        if self.domain.is_empty() {
            return Err("暴破模式需要指定根域名".into());
        }
        Ok(())
    }

    /// 转换为引擎配置
    ///
    /// subdomains_list 参数允许调用方把管道输入落盘后的文件路径接进来，
    /// 优先于 -l 指定的列表文件。
    pub fn into_config(self, subdomains_list: Option<String>) -> SubdomainResolveConfig {
        SubdomainResolveConfig {
            domains: self.domain,
            wordlist: self.wordlist,
            subdomains_list: subdomains_list.or(self.list),
            massdns_raw: self.massdns_raw,
            resolvers_file: self.resolvers.unwrap_or_default(),
            trusted_resolvers: self.trusted_resolvers,
            massdns_path: self.massdns,
            massdns_cmd: self.massdns_cmd,
            output_file: self.output,
            json: self.json,
            threads: self.threads,
            wildcard_threads: self.wildcard_threads,
            strict_wildcard: self.strict_wildcard,
            retries: self.retries,
            batch_size: self.batch_size,
            keep_stderr: self.keep_stderr,
            filter_internal_ips: self.filter_internal_ips,
            auto_extract_root_domains: self.auto_extract_root_domains,
            temp_dir: self.directory,
            wildcard_output_file: self.wildcard_output_file,
            wildcard_input_file: self.wildcard_input_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_opts(resolvers: &str) -> Opts {
        Opts::parse_from([
            "rshuffledns",
            "-d",
            "example.com",
            "-w",
            "words.txt",
            "-r",
            resolvers,
        ])
    }

    fn resolvers_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "8.8.8.8").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_validate_ok() {
        let resolvers = resolvers_file();
        let opts = base_opts(resolvers.path().to_str().unwrap());
        assert!(opts.validate(false).is_ok());
    }

    #[test]
    fn test_validate_requires_resolvers() {
        let opts = Opts::parse_from(["rshuffledns", "-d", "example.com", "-w", "words.txt"]);
        assert!(opts.validate(false).is_err());
    }

    #[test]
    fn test_validate_rejects_both_modes() {
        let resolvers = resolvers_file();
        let mut opts = base_opts(resolvers.path().to_str().unwrap());
        opts.list = Some("subs.txt".to_string());
        assert!(opts.validate(false).is_err());
    }

    #[test]
    fn test_validate_rejects_verbose_and_silent() {
        let resolvers = resolvers_file();
        let mut opts = base_opts(resolvers.path().to_str().unwrap());
        opts.verbose = true;
        opts.silent = true;
        assert!(opts.validate(false).is_err());
    }

    #[test]
    fn test_validate_raw_mode_needs_domain() {
        let resolvers = resolvers_file();
        let mut opts = base_opts(resolvers.path().to_str().unwrap());
        opts.wordlist = None;
        opts.massdns_raw = Some("massdns.txt".to_string());
        opts.domain.clear();
        assert!(opts.validate(false).is_err());

        opts.domain = vec!["example.com".to_string()];
        assert!(opts.validate(false).is_ok());
    }

    #[test]
    fn test_validate_bruteforce_needs_domain() {
        let resolvers = resolvers_file();
        let mut opts = base_opts(resolvers.path().to_str().unwrap());
        opts.domain.clear();
        assert!(opts.validate(false).is_err());
    }

    #[test]
    fn test_validate_stdin_counts_as_input() {
        let resolvers = resolvers_file();
        let mut opts = base_opts(resolvers.path().to_str().unwrap());
        opts.wordlist = None;
        opts.domain.clear();
        assert!(opts.validate(true).is_ok());
        assert!(opts.validate(false).is_err());
    }

    #[test]
    fn test_into_config() {
        let resolvers = resolvers_file();
        let opts = base_opts(resolvers.path().to_str().unwrap());
        let config = opts.into_config(None);
        assert_eq!(config.domains, vec!["example.com".to_string()]);
        assert_eq!(config.wordlist, Some("words.txt".to_string()));
        assert_eq!(config.threads, 10_000);
        assert_eq!(config.wildcard_threads, 25);
    }
}
