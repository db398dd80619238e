//! 在已有的骨外膜分割内区分皮质骨与松质骨.
//!
//! 用法: `endosteal <base_name> [lower upper]`. 需要先运行 `periosteal` 得到
//! `<base>_SHEET.nii` 和 `<base>_PERI.nii`. 标签码位于 `[lower, upper]` 的体素
//! 组成骨外膜掩膜, 默认取所有非零标签.

use std::process::ExitCode;

use log::{error, info};

mod runner;

/// 解析可选的标签码区间.
fn parse_range(args: &[String]) -> Option<(u8, u8)> {
    match args {
        [] => Some((1, u8::MAX)),
        [lower, upper] => {
            let (lower, upper) = (lower.parse().ok()?, upper.parse().ok()?);
            (lower <= upper).then_some((lower, upper))
        }
        _ => None,
    }
}

fn main() -> ExitCode {
    simple_logger::init_with_level(log::Level::Info).unwrap();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (Some(base), Some(range)) = (args.first(), args.get(1..).and_then(parse_range)) else {
        eprintln!("Usage: endosteal <base_name> [lower upper]");
        return ExitCode::FAILURE;
    };
    let Some(files) = utils::loader::ScanFiles::from_env_or_home(base) else {
        error!("cannot locate model directory, set $BONE_MODEL_DIR");
        return ExitCode::FAILURE;
    };

    info!("running `{base}` on {} cpus, labels {range:?}", utils::cpus());
    utils::sep();
    match runner::run(&files, range) {
        Ok(()) => {
            utils::sep();
            info!("done, result written to {}", files.endo.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
