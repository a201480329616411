use clap::Parser;
use srcmirror_lib::config::{AppConfig, StorageType};
use srcmirror_lib::core::{MirrorEngine, MirrorTarget, RunStatus};
use srcmirror_lib::db::RunHistory;
use srcmirror_lib::logging;
use srcmirror_lib::notify::create_notifier;
use srcmirror_lib::snapshot::SnapshotJob;
use srcmirror_lib::source::{HttpSource, Source};
use srcmirror_lib::storage::{create_storage, Storage};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Mirror an HTTP directory listing into object storage", long_about = None)]
struct Args {
    /// JSON 配置文件，未指定时只读取环境变量
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 跳过每日快照
    #[arg(long)]
    skip_snapshot: bool,

    /// 写入内存存储，不修改真实目标
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match AppConfig::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("配置加载失败: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = logging::init(&config.log);

    if args.dry_run {
        info!("dry-run 模式：目标替换为内存存储");
        config.destination.typ = StorageType::Memory;
    }

    match run(config, args.skip_snapshot).await {
        Ok(status) if matches!(status, RunStatus::Success | RunStatus::PartialFailure) => {
            ExitCode::SUCCESS
        }
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("启动失败: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig, skip_snapshot: bool) -> anyhow::Result<RunStatus> {
    let source: Arc<dyn Source> = Arc::new(HttpSource::new(&config.source)?);
    let storage: Arc<dyn Storage> = create_storage(&config.destination).await?;
    let notifier = create_notifier(&config.notify)?;

    if let Some(snapshot) = config.snapshot.clone().filter(|_| !skip_snapshot) {
        let job = SnapshotJob::new(source.clone(), storage.clone(), snapshot);
        match job.run(chrono::Utc::now().date_naive()).await {
            Ok(outcome) => info!("快照: {:?}", outcome),
            // 快照与镜像相互独立
            Err(e) => warn!("{}", e),
        }
    }

    let engine = Arc::new(
        MirrorEngine::new(
            source,
            storage,
            notifier,
            MirrorTarget::from_config(&config),
            config.sync.clone(),
        )
        .with_notify_subject(config.notify.subject.clone()),
    );

    let ctrl_c_engine = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消...");
            ctrl_c_engine.cancel();
        }
    });

    let result = engine.run().await;

    if let Some(db_path) = config.history_db.as_deref() {
        match RunHistory::open(Path::new(db_path)).await {
            Ok(history) => {
                if let Err(e) = history.record(&result).await {
                    warn!("保存运行记录失败: {:#}", e);
                }
            }
            Err(e) => warn!("打开运行历史失败: {:#}", e),
        }
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.status)
}
