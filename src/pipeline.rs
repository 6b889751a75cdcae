use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::massdns::MassdnsRunner;
use crate::parser;
use crate::store::StoreWriter;
use crate::util::is_ignorable_ip;

type PipelineError = Box<dyn std::error::Error + Send + Sync>;

/// 分块批处理的定时刷新间隔，输入流卡住时兜底触发
const CHUNK_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// 分块流式解析管线
///
/// 把输入流攒成有界分块，每个分块走一遍 写分块文件 -> massdns ->
/// 解析输出 -> 入库 的流程，然后删掉分块和输出文件。分块顺序执行，
/// 并行度来自massdns内部，这样也顺便限制了磁盘峰值占用。
pub struct ChunkedPipeline {
    runner: MassdnsRunner,
    batch_size: usize,
    temp_dir: PathBuf,
    filter_internal_ips: bool,
    cancel: CancellationToken,
    chunk_count: usize,
}

impl ChunkedPipeline {
    /// 创建管线
    pub fn new(
        runner: MassdnsRunner,
        batch_size: usize,
        temp_dir: PathBuf,
        filter_internal_ips: bool,
        cancel: CancellationToken,
    ) -> Self {
        ChunkedPipeline {
            runner,
            batch_size: batch_size.max(1),
            temp_dir,
            filter_internal_ips,
            cancel,
            chunk_count: 0,
        }
    }

    /// 字典暴破模式
    ///
    /// 逐行读取字典（转小写、空行跳过），和每个根域名拼出
    /// `单词.根域名` 待解析项。返回产生的排列总数。
    pub async fn run_wordlist<R>(
        &mut self,
        wordlist: R,
        domains: &[String],
        writer: &StoreWriter,
    ) -> Result<usize, PipelineError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = wordlist.lines();
        let mut chunk: Vec<String> = Vec::new();
        let mut total = 0usize;

        let cancel = self.cancel.clone();
        let mut ticker = tokio::time::interval(CHUNK_FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line? {
                        Some(line) => {
                            let word = line.trim().to_lowercase();
                            if word.is_empty() {
                                continue;
                            }
                            for apex in domains {
                                chunk.push(format!("{}.{}", word, apex));
                                total += 1;
                                if chunk.len() >= self.batch_size {
                                    self.flush_chunk(&mut chunk, writer).await?;
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if !chunk.is_empty() {
                        self.flush_chunk(&mut chunk, writer).await?;
                    }
                }
                _ = cancel.cancelled() => {
                    return Err("枚举已取消".into());
                }
            }
        }

        if !chunk.is_empty() {
            self.flush_chunk(&mut chunk, writer).await?;
        }
        Ok(total)
    }

    /// 子域名列表解析模式，输入已经是完整域名，不做排列
    pub async fn run_hosts<R>(
        &mut self,
        hosts: R,
        writer: &StoreWriter,
    ) -> Result<usize, PipelineError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = hosts.lines();
        let mut chunk: Vec<String> = Vec::new();
        let mut total = 0usize;

        let cancel = self.cancel.clone();
        let mut ticker = tokio::time::interval(CHUNK_FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line? {
                        Some(line) => {
                            let host = line.trim().to_lowercase();
                            if host.is_empty() {
                                continue;
                            }
                            chunk.push(host);
                            total += 1;
                            if chunk.len() >= self.batch_size {
                                self.flush_chunk(&mut chunk, writer).await?;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if !chunk.is_empty() {
                        self.flush_chunk(&mut chunk, writer).await?;
                    }
                }
                _ = cancel.cancelled() => {
                    return Err("解析已取消".into());
                }
            }
        }

        if !chunk.is_empty() {
            self.flush_chunk(&mut chunk, writer).await?;
        }
        Ok(total)
    }

    /// 原始输出模式，跳过massdns，直接解析已有的输出文件入库
    pub async fn run_raw(&self, path: &Path, writer: &StoreWriter) -> Result<(), PipelineError> {
        self.ingest_output(path, writer).await
    }

    /// 刷新一个分块：写临时文件、跑massdns、解析入库、删临时文件
    async fn flush_chunk(
        &mut self,
        chunk: &mut Vec<String>,
        writer: &StoreWriter,
    ) -> Result<(), PipelineError> {
        self.chunk_count += 1;
        let index = self.chunk_count;
        let size = chunk.len();

        let (file, chunk_path) = tempfile::Builder::new()
            .prefix("chunk-")
            .tempfile_in(&self.temp_dir)
            .map_err(|e| format!("无法创建分块文件: {}", e))?
            .keep()?;
        {
            let mut buffered = std::io::BufWriter::new(&file);
            for host in chunk.iter() {
                writeln!(buffered, "{}", host)?;
            }
            buffered.flush()?;
        }
        drop(file);
        chunk.clear();

        log::info!("分块 {} 开始解析，共 {} 条", index, size);

        let run_result = self.runner.run(&chunk_path, &self.cancel).await;
        let _ = std::fs::remove_file(&chunk_path);
        let output = run_result?;

        log::info!("分块 {} massdns执行耗时 {:.2?}", index, output.elapsed);

        let ingest_result = self.ingest_output(&output.stdout_path, writer).await;
        let _ = std::fs::remove_file(&output.stdout_path);
        if let Some(stderr_path) = &output.stderr_path {
            let _ = std::fs::remove_file(stderr_path);
        }
        ingest_result
    }

    /// 解析massdns输出并写入存储批处理器
    async fn ingest_output(&self, path: &Path, writer: &StoreWriter) -> Result<(), PipelineError> {
        let tx = writer.sender();
        let filter_internal = self.filter_internal_ips;
        let path = path.to_path_buf();

        // 解析是同步IO，放到阻塞线程池，通过通道回灌写入任务
        tokio::task::spawn_blocking(move || {
            parser::parse_file(&path, |hostname, ips| {
                for ip in ips {
                    if is_ignorable_ip(&ip, filter_internal) {
                        continue;
                    }
                    tx.blocking_send((ip, hostname.clone()))
                        .map_err(|_| "存储写入通道已关闭")?;
                }
                Ok(())
            })
        })
        .await
        .map_err(|e| format!("解析任务异常退出: {}", e))??;
        Ok(())
    }

    /// 已处理的分块数
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }
}
