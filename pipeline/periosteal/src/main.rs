//! 对单个扫描运行完整流程: HU -> sheetness -> 十个骨骼标签 -> 合并结果.
//!
//! 用法: `periosteal <base_name>`. 文件目录见 [`utils::loader::model_dir_from_env_or_home`].

use std::process::ExitCode;

use log::{error, info};

mod runner;

fn main() -> ExitCode {
    simple_logger::init_with_level(log::Level::Info).unwrap();

    let Some(base) = std::env::args().nth(1) else {
        eprintln!("Usage: periosteal <base_name>");
        return ExitCode::FAILURE;
    };
    let Some(files) = utils::loader::ScanFiles::from_env_or_home(&base) else {
        error!("cannot locate model directory, set $BONE_MODEL_DIR");
        return ExitCode::FAILURE;
    };

    info!("running `{base}` on {} cpus", utils::cpus());
    utils::sep();
    match runner::run(&files) {
        Ok(()) => {
            utils::sep();
            info!("done, result written to {}", files.peri.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
