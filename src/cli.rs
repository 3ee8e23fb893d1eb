use std::num::NonZeroU16;
use std::path::PathBuf;

use clap::Parser;

/// Default maximum object size: 5 TiB, matching the S3 object size cap.
const DEFAULT_MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024 * 1024;

#[derive(Parser, Debug)]
pub struct Cli {
    #[clap(short, long, default_value = "8090", env = "SANDBAR_PORT")]
    pub port: NonZeroU16,

    #[clap(long, default_value = "127.0.0.1", env = "SANDBAR_HOST")]
    pub host: String,

    #[clap(short, long, default_value = "./data", env = "SANDBAR_ROOT_DIR")]
    pub root_dir: PathBuf,

    #[clap(
        short,
        long,
        default_value = "./credentials",
        env = "SANDBAR_CREDENTIALS_DIR"
    )]
    pub credentials_dir: PathBuf,

    /// Maximum allowed object (and part) size in bytes.
    #[clap(
        long,
        default_value_t = DEFAULT_MAX_OBJECT_SIZE,
        env = "SANDBAR_MAX_OBJECT_SIZE"
    )]
    pub max_object_size: u64,

    /// Enable CORS headers and OPTIONS preflight handling.
    #[clap(long, env = "SANDBAR_CORS")]
    pub cors: bool,

    #[clap(long, default_value = "*", env = "SANDBAR_CORS_ALLOW_ORIGIN")]
    pub cors_allow_origin: String,

    /// Log routine authentication successes at info level.
    #[clap(short, long, env = "SANDBAR_VERBOSE")]
    pub verbose: bool,
}
