mod cli;

use std::error::Error;
use std::fs::{self, File};
use std::io::BufReader;
use std::sync::Arc;

use bufcache_fs::blk_dev::{BlockDevice, FileDisk};
use bufcache_fs::block_cache::BufferCache;
use bufcache_fs::common::Config;
use bufcache_fs::disk::create_image;
use bufcache_fs::process::RunningProcess;
use bufcache_fs::stat::Stats;
use bufcache_fs::trace;
use bufcache_fs::vfs::Vfs;
use clap::Parser;
use cli::{Cli, Command};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Mkfs {
            image,
            size,
            layout,
        } => {
            let disk = create_image(&image, size, &layout.config(), Arc::new(Stats::new()))?;
            println!("{}: {} blocks", image.display(), disk.num_blocks());
        }
        Command::Run {
            image,
            trace: trace_file,
            mem_percentage,
            min_frames,
            read_check,
        } => {
            let calls = trace::parse(BufReader::new(File::open(&trace_file)?))?;
            let config = Config {
                mem_percentage,
                min_frames,
                ..Config::default()
            };
            let stats = Arc::new(Stats::new());
            let disk = Arc::new(FileDisk::open(&image, Arc::clone(&stats))?);
            let process = Arc::new(RunningProcess::new(0));
            println!("Number of memory pages: {}", config.frame_count(disk.num_blocks())?);

            let mut vfs = Vfs::mount(disk, &config, process.clone(), Arc::clone(&stats))?;
            vfs.startup()?;
            let replay = trace::replay(&mut vfs, &process, &calls)?;
            vfs.shutdown()?;

            if let Some(prefix) = read_check {
                for (pid, bytes) in &replay.read_check {
                    let path = format!("{}.{pid}", prefix.display());
                    let text: String = bytes.iter().map(|b| format!(" {b:02x}")).collect();
                    fs::write(path, text)?;
                }
            }
            println!("{} calls, {} rejected", replay.ok + replay.failed, replay.failed);
            println!("{}", vfs.cache().stats().snapshot());
        }
    }
    Ok(())
}
