use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;
use log::warn;

use crate::auth::TokenSigner;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The address courseware should listen on. By default
    /// courseware will listen just on the IPv4 loopback.
    #[arg(short, long)]
    address: Option<String>,

    /// The port courseware listens on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Directory holding the course database.
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Secret for signing session tokens. If unset, a random one is
    /// generated and tokens won't survive a restart.
    #[arg(long, env = "COURSEWARE_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Places in a section that doesn't set its own capacity.
    #[arg(long, default_value_t = 10)]
    capacity: u32,

    /// How long a session token stays valid, in hours.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    token_hours: u32,

    /// JSON file of courses, sections and sessions to load at startup.
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Serve /addCourse, /addSection and /addSession.
    #[arg(long)]
    admin: bool,

    /// Log filter, e.g. "info" or "courseware=debug".
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log: String,
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tokens(&self) -> TokenSigner {
        let lifetime = i64::from(self.token_hours) * 60 * 60;

        match self.secret {
            Some(ref secret) => TokenSigner::new(secret.clone(), lifetime),
            None => {
                warn!("no --secret given, session tokens won't survive a restart");
                TokenSigner::random(lifetime)
            }
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn seed(&self) -> Option<&Path> {
        self.seed.as_deref()
    }

    pub fn admin(&self) -> bool {
        self.admin
    }

    pub fn log_filter(&self) -> &str {
        &self.log
    }
}
