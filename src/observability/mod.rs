//! 可观测性：tracing 订阅器初始化
//!
//! 默认 info（--verbose 时 debug），RUST_LOG 优先；日志写 stderr，stdout 留给 REPL 与运行结果。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // 重复初始化（如测试中）忽略即可
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
