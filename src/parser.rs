use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::util::normalize_hostname;

/// 回调错误类型，解析会在回调出错时立即终止并原样上抛
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// 解析massdns输出文件
pub fn parse_file<F>(path: &Path, on_result: F) -> Result<(), CallbackError>
where
    F: FnMut(String, Vec<String>) -> Result<(), CallbackError>,
{
    let file =
        File::open(path).map_err(|e| format!("无法打开massdns输出文件 {}: {}", path.display(), e))?;
    parse_reader(BufReader::new(file), on_result)
}

/// 解析massdns的 `-o Snl` 输出流
///
/// 记录块之间以空行分隔，每个非空行的格式为 `NAME TYPE VALUE` 三段。
/// 每解析完一个块，通过回调上报一条 (域名, IP列表) 结果：
///
/// - NS 记录将整个块标记为权威应答，块内后续记录全部忽略
/// - 第一条 CNAME 记录的属主名固定为该块的域名，后续CNAME只作参考
/// - A 记录把值追加到IP列表；没出现过CNAME且域名未绑定时，A记录的属主名成为块域名
/// - 其他类型的记录忽略，字段数不是三段的行跳过
pub fn parse_reader<R, F>(reader: R, mut on_result: F) -> Result<(), CallbackError>
where
    R: BufRead,
    F: FnMut(String, Vec<String>) -> Result<(), CallbackError>,
{
    // 块内状态
    let mut cname_seen = false;
    let mut ns_seen = false;

    let mut domain = String::new();
    let mut ips: Vec<String> = Vec::new();

    for line in reader.lines() {
        let text = line?;

        if text.is_empty() {
            // 空行是massdns应答之间的分隔符，块内状态就此归零
            cname_seen = false;
            ns_seen = false;
            if !domain.is_empty() {
                on_result(std::mem::take(&mut domain), std::mem::take(&mut ips))?;
            }
            continue;
        }

        let parts: Vec<&str> = text.split_whitespace().collect();
        if parts.len() != 3 {
            continue;
        }

        match parts[1] {
            "NS" => {
                // 权威应答块，后面的记录全部忽略
                ns_seen = true;
            }
            "CNAME" => {
                // 只取第一条CNAME的属主名，避免递归CNAME改写域名
                if !cname_seen {
                    ns_seen = false;
                    domain = normalize_hostname(parts[0]);
                    cname_seen = true;
                }
            }
            "A" => {
                if !ns_seen {
                    if !cname_seen && domain.is_empty() {
                        domain = normalize_hostname(parts[0]);
                    }
                    ips.push(parts[2].to_string());
                }
            }
            _ => {}
        }
    }

    // 文件结尾可能还压着最后一个块
    if !domain.is_empty() {
        on_result(domain, ips)?;
    }
    Ok(())
}
