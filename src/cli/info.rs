use anyhow::Result;

use super::context::CliContext;

pub async fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();

    println!("devpipe");
    println!("=======");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Build Date: {}", option_env!("BUILD_DATE").unwrap_or("unknown"));
    println!("Git Commit: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!();

    println!("Configuration:");
    match ctx.config_path() {
        Some(path) => println!("- File: {}", path.display()),
        None => println!("- File: (defaults)"),
    }
    println!("- Debugger: {}", config.cdp.http_endpoint());
    println!(
        "- Tabs: {}",
        if config.sessions.multi_tab {
            "all (new tabs followed)"
        } else {
            "single"
        }
    );
    println!("- Log Directory: {}", config.log.root.display());
    println!(
        "- Click Limit: {} per {}ms, {}ms debounce ({:?})",
        config.pipeline.rate_limit_count,
        config.pipeline.rate_limit_window_ms,
        config.pipeline.micro_debounce_ms,
        config.pipeline.click_scope
    );
    println!("- Bundle Window: {}ms", config.tap.bundle_window_ms);
    println!("- Bundled Types: {}", config.tap.bundled_types.join(", "));
    Ok(())
}
