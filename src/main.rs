use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;

mod api;
mod cli;
mod error;
mod metrics;
mod models;
mod services;
mod state;

use cli::CommandArgs;
use state::new_state;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();
    let bind_address = format!("{}:{}", args.address, args.port);

    let state = new_state(&args);
    log::info!(
        "Using supervisor '{}' (timeout {}s)",
        args.pm2_bin,
        args.command_timeout
    );

    print_banner(&args);

    let app_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .configure(api::configure)
    })
        .bind(&bind_address)
        .with_context(|| format!("failed to bind {}", bind_address))?
        .run()
        .await
        .context("http server terminated with an error")?;

    // 服务停止后收掉所有 tail 子进程，再关闭 broker
    log::info!("Shutting down {} log session(s)", state.bridge.active_sessions());
    state.bridge.shutdown().await;
    state.broker.close();

    Ok(())
}

fn print_banner(args: &CommandArgs) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      PM2 Bridge v{:<41}║", env!("CARGO_PKG_VERSION"));
    println!("║      Inventory, control and live log streaming            ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Server starting on http://{}:{}", args.address, args.port);
    println!();
    println!("📋 Available endpoints:");
    println!("  GET    /api/processes                    - List processes");
    println!("  GET    /api/processes/summary            - Status summary");
    println!("  POST   /api/processes/{{id}}/{{action}}      - start | stop | restart");
    println!("  GET    /api/restart/{{id}}                 - Restart a process");
    println!("  POST   /api/remote/restart               - Restart over ssh");
    println!("  GET    /api/processes/{{id}}/logs          - Recent log lines");
    println!("  POST   /api/processes/{{id}}/stream        - Open live log stream");
    println!("  DELETE /api/processes/{{id}}/stream        - Close live log stream");
    println!("  GET    /api/channels/{{channel}}/events    - Server-Sent Events");
    println!("  GET    /metrics                          - Prometheus metrics");
    println!("  GET    /health                           - Health check");
    println!("═══════════════════════════════════════════════════════════");
}
