use visitlog_server::{mail, reports, server, storage};
mod cli;

use tracing_subscriber::EnvFilter;
use visitlog_shared::domain::DEFAULT_ADMIN_IMAGE;

#[tokio::main]
async fn main() {
    use clap::Parser;
    let args = cli::Cli::parse();

    if let Some(cli::Command::HashPassword { password, cost }) = &args.command {
        match bcrypt::hash(password, *cost) {
            Ok(h) => println!("{h}"),
            Err(e) => {
                eprintln!("Hash error: {e}");
                std::process::exit(2);
            }
        }
        return;
    }

    let config = match server::AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(2);
        }
    };

    // Console-only logging; RUST_LOG wins, else debug/info by config
    let default_level = if config.debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(true)
        .init();

    let store = match storage::Store::connect_sqlite(&config.db_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error=%e, path=%config.db_path, "Failed to open database");
            std::process::exit(3);
        }
    };

    match args.command {
        Some(cli::Command::InitDb {
            username,
            email,
            password,
            first_name,
            last_name,
            no_courses,
        }) => {
            let hash = match bcrypt::hash(&password, bcrypt::DEFAULT_COST) {
                Ok(h) => h,
                Err(e) => {
                    tracing::error!(error=%e, "init-db: hashing failed");
                    std::process::exit(2);
                }
            };
            let admin = storage::models::UserInput {
                username,
                email,
                first_name,
                last_name,
                phone: None,
                password_hash: Some(hash),
                role: "admin".to_string(),
                location_id: None,
                image: Some(DEFAULT_ADMIN_IMAGE.to_string()),
            };
            let courses: &[&str] = if no_courses {
                &[]
            } else {
                &cli::DEFAULT_COURSES
            };
            match store.seed_defaults(admin, courses).await {
                Ok((admin_created, added)) => {
                    tracing::info!(admin_created, courses_added = added, path=%config.db_path, "init-db: done");
                }
                Err(e) => {
                    tracing::error!(error=%e, "init-db: seeding failed");
                    std::process::exit(4);
                }
            }
        }
        Some(cli::Command::HashPassword { .. }) => {}
        Some(cli::Command::Serve) | None => serve(config, store).await,
    }
}

async fn serve(config: server::AppConfig, store: storage::Store) {
    if let Err(e) = config.validate() {
        tracing::error!(error=%e, "Invalid config");
        std::process::exit(2);
    }

    if let Some(font) = &config.chart_font_path {
        match reports::chart::install_font(font) {
            Ok(()) => tracing::info!(path=%font.display(), "chart font loaded"),
            Err(e) => tracing::warn!(error=%e, "chart font unavailable, charts will be unlabelled"),
        }
    }

    let mailer = match mail::mailer_from_config(&config) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error=%e, "Failed to set up mail transport");
            std::process::exit(2);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.upload_dir) {
        tracing::error!(error=%e, path=%config.upload_dir.display(), "Failed to create upload dir");
        std::process::exit(3);
    }

    let addr = format!("{}:{}", config.listen_host, config.listen_port);
    let state = match server::AppState::new(config, store, mailer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error=%e, "Invalid config");
            std::process::exit(2);
        }
    };
    let shutdown_token = state.shutdown_token();
    let shutdown_token_for_server = shutdown_token.clone();

    let app = server::router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error=%e, %addr, "Failed to bind listener");
            std::process::exit(3);
        }
    };
    tracing::info!(%addr, "Starting server");

    let mut server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_token_for_server.cancelled_owned())
            .await
    });

    // Wait for OS signal; then trigger graceful, and if it hangs beyond timeout, force abort.
    shutdown_signal().await;
    tracing::info!("shutdown: initiating graceful stop");
    shutdown_token.cancel();
    match tokio::time::timeout(std::time::Duration::from_secs(3), &mut server_task).await {
        Ok(join_res) => match join_res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(%err, "server error"),
            Err(e) => tracing::error!(error=%e, "server task join error"),
        },
        Err(_) => {
            tracing::warn!("shutdown: forcing server abort due to timeout");
            server_task.abort();
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(i), Ok(t)) => (i, t),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(error=%e, "shutdown: signal handlers unavailable, using Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown: received Ctrl+C");
    }
}
