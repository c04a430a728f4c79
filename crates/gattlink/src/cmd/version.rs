use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("gattlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: gattlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("GATTLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "defaults: fragment={}B delay={}ms busy_timeout={}ms",
        gattlink_frame::DEFAULT_MAX_FRAGMENT_BYTES,
        gattlink_frame::DEFAULT_INTER_FRAGMENT_DELAY.as_millis(),
        gattlink_session::DEFAULT_BUSY_TIMEOUT.as_millis()
    );

    Ok(SUCCESS)
}
