use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use taskbar_tracker::events::TrackerEventKind;
use taskbar_tracker::{create_desktop, listener_fn, Config, WindowTracker};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "taskbar-tracker")]
#[command(about = "Отслеживание окон панели задач по уведомлениям оболочки Windows")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "tracker.toml")]
    config: String,

    /// Режим сухого запуска (эмулированный рабочий стол)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    // Инициализация системы логирования
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level, &config.logging.format)?;

    info!("Запуск taskbar-tracker v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - используется эмулированный рабочий стол");
    }

    let desktop = create_desktop(&config, args.dry_run)?;
    let owner = desktop.session.owner();

    let tracker = Arc::new(WindowTracker::new(
        config.tracker_settings(),
        desktop.platform,
        desktop.classifier,
    ));

    tracker.subscribe(listener_fn(|event| match event.kind {
        TrackerEventKind::Added => info!("+ {}", event.window),
        TrackerEventKind::Removed => info!("- {}", event.window),
        TrackerEventKind::Updated => info!("~ {}", event.window),
        TrackerEventKind::MonitorChanged => info!("→ {} на {:?}", event.window, event.window.monitor),
    }));

    tracker.start(owner)?;
    info!("На панели задач {} окон", tracker.snapshot_all().len());

    let session = desktop.session;
    let session_handle = tokio::spawn(async move {
        if let Err(e) = session.run().await {
            error!("Ошибка в сессии рабочего стола: {}", e);
        }
    });

    // Ожидание сигнала завершения
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Получен сигнал завершения (Ctrl+C)");
        }
        Err(err) => {
            error!("Ошибка при ожидании сигнала завершения: {}", err);
        }
    }

    info!("Завершение работы...");
    tracker.stop();
    session_handle.abort();

    info!("taskbar-tracker завершил работу");
    Ok(())
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
    }

    Ok(())
}
