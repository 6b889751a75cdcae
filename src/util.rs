use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// 生成一个长度为 n 的随机小写字母数字标签
///
/// 用于泛解析探测，随机标签可以避免命中DNS服务器缓存。
pub fn random_label(n: usize) -> String {
    let mut rng = thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric) as char)
        .map(|c| c.to_ascii_lowercase())
        .take(n)
        .collect()
}

/// 判断一个IP是否应在入库阶段被丢弃
///
/// 网络地址（末位为0）、广播地址（末位为255）以及 0.0.0.0 永远被过滤；
/// filter_internal 开启时额外过滤内网、回环和链路本地地址。
pub fn is_ignorable_ip(ip: &str, filter_internal: bool) -> bool {
    let addr: Ipv4Addr = match ip.parse() {
        Ok(addr) => addr,
        // 非法的IPv4字符串直接丢弃
        Err(_) => return true,
    };

    if addr == Ipv4Addr::UNSPECIFIED {
        return true;
    }

    let octets = addr.octets();
    if octets[3] == 0 || octets[3] == 255 {
        return true;
    }

    if filter_internal && (addr.is_private() || addr.is_loopback() || addr.is_link_local()) {
        return true;
    }

    false
}

/// 检查一个文件是否为空或只包含空白行
pub fn is_blank_file(path: &Path) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// 去掉域名末尾的点并转为小写
pub fn normalize_hostname(host: &str) -> String {
    host.trim_end_matches('.').to_lowercase()
}
