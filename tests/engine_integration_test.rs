use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use rshuffledns::{SubdomainResolveConfig, SubdomainResolveEngine};

fn write_resolvers(dir: &Path) -> PathBuf {
    let path = dir.join("resolvers.txt");
    std::fs::write(&path, "8.8.8.8\n8.8.4.4\n").unwrap();
    path
}

fn write_fake_massdns(dir: &Path) -> PathBuf {
    // 伪massdns：把输入的每个域名映射成一条固定IP的A记录
    let path = dir.join("massdns");
    let script = "#!/bin/sh\nwhile read host; do\n  printf '%s. A 10.0.0.1\\n\\n' \"$host\"\ndone < \"${11}\"\n";
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn test_engine_creation_requires_resolvers() {
    // 缺DNS服务器列表应该在创建阶段失败
    let config = SubdomainResolveConfig::default();
    assert!(SubdomainResolveEngine::new(config).await.is_err());
}

#[tokio::test]
async fn test_raw_mode_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let resolvers = write_resolvers(dir.path());

    // 覆盖单A记录和CNAME链两种块
    let raw = dir.path().join("massdns.txt");
    std::fs::write(
        &raw,
        "docs.bugbounty.com. A 185.199.111.153\n\n\
         docs.hackerone.com. CNAME hacker0x01.github.io.\n\
         hacker0x01.github.io. A 185.199.108.153\n",
    )
    .unwrap();

    let output = dir.path().join("result.txt");
    let config = SubdomainResolveConfig {
        domains: vec!["bugbounty.com".to_string(), "hackerone.com".to_string()],
        massdns_raw: Some(raw.to_string_lossy().to_string()),
        resolvers_file: resolvers.to_string_lossy().to_string(),
        output_file: Some(output.to_string_lossy().to_string()),
        temp_dir: Some(dir.path().to_string_lossy().to_string()),
        ..Default::default()
    };

    let engine = SubdomainResolveEngine::new(config).await.unwrap();
    let resolved = engine.process().await.unwrap();
    assert_eq!(resolved, 2);

    let data = std::fs::read_to_string(&output).unwrap();
    let mut lines: Vec<&str> = data.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["docs.bugbounty.com", "docs.hackerone.com"]);
}

#[tokio::test]
async fn test_raw_mode_preloaded_wildcards_are_purged() {
    let dir = tempfile::tempdir().unwrap();
    let resolvers = write_resolvers(dir.path());

    let raw = dir.path().join("massdns.txt");
    std::fs::write(
        &raw,
        "a.example.com. A 1.2.3.4\n\nb.example.com. A 9.9.9.9\n",
    )
    .unwrap();

    // 9.9.9.9 已知是泛解析IP，预载后b.example.com应被清除
    let known = dir.path().join("known-wildcards.txt");
    std::fs::write(&known, "9.9.9.9\n").unwrap();

    let output = dir.path().join("result.txt");
    let dump = dir.path().join("wildcards-out.txt");
    let config = SubdomainResolveConfig {
        domains: vec!["example.com".to_string()],
        massdns_raw: Some(raw.to_string_lossy().to_string()),
        resolvers_file: resolvers.to_string_lossy().to_string(),
        output_file: Some(output.to_string_lossy().to_string()),
        wildcard_input_file: Some(known.to_string_lossy().to_string()),
        wildcard_output_file: Some(dump.to_string_lossy().to_string()),
        temp_dir: Some(dir.path().to_string_lossy().to_string()),
        ..Default::default()
    };

    let engine = SubdomainResolveEngine::new(config).await.unwrap();
    assert!(engine.wildcard_store().has("9.9.9.9"));

    let resolved = engine.process().await.unwrap();
    assert_eq!(resolved, 1);

    let data = std::fs::read_to_string(&output).unwrap();
    assert_eq!(data.trim(), "a.example.com");

    // 泛解析IP集合被存档
    let dumped = std::fs::read_to_string(&dump).unwrap();
    assert!(dumped.lines().any(|line| line == "9.9.9.9"));
}

#[tokio::test]
async fn test_bruteforce_mode_with_fake_massdns() {
    let dir = tempfile::tempdir().unwrap();
    let resolvers = write_resolvers(dir.path());
    let massdns = write_fake_massdns(dir.path());

    let wordlist = dir.path().join("words.txt");
    std::fs::write(&wordlist, "www\napi\nmail\n").unwrap();

    let output = dir.path().join("result.txt");
    let config = SubdomainResolveConfig {
        domains: vec!["example.com".to_string()],
        wordlist: Some(wordlist.to_string_lossy().to_string()),
        resolvers_file: resolvers.to_string_lossy().to_string(),
        massdns_path: Some(massdns.to_string_lossy().to_string()),
        output_file: Some(output.to_string_lossy().to_string()),
        temp_dir: Some(dir.path().to_string_lossy().to_string()),
        // 小分块，强制走多轮massdns
        batch_size: 2,
        ..Default::default()
    };

    let engine = SubdomainResolveEngine::new(config).await.unwrap();
    let resolved = engine.process().await.unwrap();
    assert_eq!(resolved, 3);

    let data = std::fs::read_to_string(&output).unwrap();
    let mut lines: Vec<&str> = data.lines().collect();
    lines.sort_unstable();
    assert_eq!(
        lines,
        vec!["api.example.com", "mail.example.com", "www.example.com"]
    );
}

#[tokio::test]
async fn test_resolve_mode_with_fake_massdns() {
    let dir = tempfile::tempdir().unwrap();
    let resolvers = write_resolvers(dir.path());
    let massdns = write_fake_massdns(dir.path());

    let list = dir.path().join("subs.txt");
    std::fs::write(&list, "A.Example.com\nb.example.com\n\n").unwrap();

    let output = dir.path().join("result.txt");
    let config = SubdomainResolveConfig {
        // 不给根域名，泛解析过滤自动关闭
        domains: Vec::new(),
        subdomains_list: Some(list.to_string_lossy().to_string()),
        resolvers_file: resolvers.to_string_lossy().to_string(),
        massdns_path: Some(massdns.to_string_lossy().to_string()),
        output_file: Some(output.to_string_lossy().to_string()),
        temp_dir: Some(dir.path().to_string_lossy().to_string()),
        ..Default::default()
    };

    let engine = SubdomainResolveEngine::new(config).await.unwrap();
    let resolved = engine.process().await.unwrap();
    assert_eq!(resolved, 2);

    let data = std::fs::read_to_string(&output).unwrap();
    let mut lines: Vec<&str> = data.lines().collect();
    lines.sort_unstable();
    // 输入转小写后解析
    assert_eq!(lines, vec!["a.example.com", "b.example.com"]);
}

#[tokio::test]
async fn test_raw_mode_rejects_blank_input() {
    let dir = tempfile::tempdir().unwrap();
    let resolvers = write_resolvers(dir.path());

    let raw = dir.path().join("massdns.txt");
    std::fs::write(&raw, "\n\n").unwrap();

    let config = SubdomainResolveConfig {
        domains: vec!["example.com".to_string()],
        massdns_raw: Some(raw.to_string_lossy().to_string()),
        resolvers_file: resolvers.to_string_lossy().to_string(),
        temp_dir: Some(dir.path().to_string_lossy().to_string()),
        ..Default::default()
    };

    let engine = SubdomainResolveEngine::new(config).await.unwrap();
    assert!(engine.process().await.is_err());
}
