use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

mod args;
use args::Args;

mod auth;
mod backend;
mod course;
mod courseware;
mod release;
mod routes;
mod section;
mod seed;
mod session;
mod signup;
mod time;
mod user;

use backend::Backend;
use courseware::Courseware;
use seed::Seed;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    pretty_env_logger::formatted_timed_builder()
        .parse_filters(args.log_filter())
        .init();

    let addr = match args.addr() {
        Ok(a) => a,
        Err(e) => {
            error!("invalid address: {e}");
            return ExitCode::FAILURE;
        }
    };

    let backend = match Backend::new(args.data_dir()).await {
        Ok(b) => b,
        Err(e) => {
            error!("couldn't open database in {}: {e}", args.data_dir().display());
            return ExitCode::FAILURE;
        }
    };

    let courseware = Arc::new(Courseware::new(backend, args.tokens(), args.capacity()));

    match courseware.check_counts().await {
        Ok(0) => {}
        Ok(n) => warn!("{n} sections have signup counts out of step"),
        Err(e) => error!("couldn't check signup counts: {e}"),
    }

    if let Some(path) = args.seed() {
        let seeded = match Seed::load(path) {
            Ok(seed) => seed.apply(&courseware).await,
            Err(e) => Err(e),
        };

        if let Err(e) = seeded {
            error!("{}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    }

    if args.admin() {
        warn!("admin routes enabled, anyone can add courses");
    }

    let routes = routes::routes(courseware, args.admin());

    let (addr, server) =
        match warp::serve(routes).try_bind_with_graceful_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("couldn't wait for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        }) {
            Ok(x) => x,
            Err(e) => {
                error!("couldn't bind {addr}: {e}");
                return ExitCode::FAILURE;
            }
        };

    info!("listening on {addr}");
    server.await;
    info!("shut down");

    ExitCode::SUCCESS
}
