use bufcache_fs::common::Config;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about = "Buffer-cached inode file system over a disk image")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create and format a disk image
    Mkfs {
        image: PathBuf,

        /// Image size in bytes, with an optional `k` or `M` suffix (default `M`)
        #[arg(value_parser = parse_size)]
        size: u64,

        #[command(flatten)]
        layout: Layout,
    },
    /// Replay a syscall trace against a disk image
    Run {
        image: PathBuf,

        trace: PathBuf,

        /// Percentage of the disk pages used as cache pages
        #[arg(long, default_value_t = 100)]
        mem_percentage: u32,

        /// Refuse to run with fewer cache pages than this
        #[arg(long, default_value_t = 6)]
        min_frames: usize,

        /// Write the bytes each process read to `<PREFIX>.<pid>`
        #[arg(long, value_name = "PREFIX")]
        read_check: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct Layout {
    #[arg(long, default_value_t = 8)]
    pub inodes_per_block: u32,

    /// Data blocks that follow each inode block
    #[arg(long, default_value_t = 8)]
    pub inode_block_ratio: u32,

    #[arg(long, default_value_t = 8)]
    pub data_blocks_per_inode: u32,
}

impl Layout {
    pub fn config(&self) -> Config {
        Config {
            inodes_per_block: self.inodes_per_block,
            inode_block_ratio: self.inode_block_ratio,
            data_blocks_per_inode: self.data_blocks_per_inode,
            ..Config::default()
        }
    }
}

/// `64k`, `2M` or a bare number of megabytes.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let (digits, unit) = match s.char_indices().last() {
        Some((i, 'k' | 'K')) => (&s[..i], 1024),
        Some((i, 'm' | 'M')) => (&s[..i], 1024 * 1024),
        _ => (s, 1024 * 1024),
    };
    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("bad size {s:?}"))?;
    n.checked_mul(unit)
        .ok_or_else(|| format!("size {s:?} is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_suffixes() {
        assert_eq!(Ok(64 * 1024), parse_size("64k"));
        assert_eq!(Ok(2 * 1024 * 1024), parse_size("2M"));
        assert_eq!(Ok(3 * 1024 * 1024), parse_size("3"));
        assert!(parse_size("k").is_err());
        assert!(parse_size("12q").is_err());
    }

    #[test]
    fn cli_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
