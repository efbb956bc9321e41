//! Syscall traces: one call per line, `<pid> <call>(<args>)[ = <value>]`.
//!
//! ```text
//! # comment
//! 1 create("notes")
//! 1 open("notes", O_RDWR | O_APPEND) = 3
//! 1 write(3, 5000) = 0xab
//! 1 seek(3, SEEK_SET, 0)
//! 1 read(3, 5000)
//! 1 close(3)
//! ```
//!
//! Scheduler directives (`proc_create`, `compute`, `proc_kill`) and unknown
//! calls are skipped.

use super::*;
use block_cache::BufferCache;
use error::VfsError;
use file::{OpenFlag, OpenFlags, Whence};
use process::{Pid, RunningProcess};
use vfs::Vfs;

use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;
use std::io::BufRead;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace line {line}: {why}")]
    Syntax { line: usize, why: String },
    #[error("trace i/o: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Syscall {
    Create { name: String },
    Open { name: String, flags: OpenFlags, fd: usize },
    Close { fd: usize },
    Write { fd: usize, len: usize, value: u8 },
    Read { fd: usize, len: usize },
    Seek { fd: usize, whence: Whence, offset: i64 },
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Syscall::Create { name } => write!(f, "create(\"{name}\")"),
            Syscall::Open { name, flags, fd } => {
                let modes: Vec<&str> = flags
                    .iter()
                    .map(|flag| match flag {
                        OpenFlag::RDONLY => "O_RDONLY",
                        OpenFlag::WRONLY => "O_WRONLY",
                        OpenFlag::RDWR => "O_RDWR",
                        OpenFlag::APPEND => "O_APPEND",
                    })
                    .collect();
                write!(f, "open(\"{name}\", {}) = {fd}", modes.join(" | "))
            }
            Syscall::Close { fd } => write!(f, "close({fd})"),
            Syscall::Write { fd, len, value } => write!(f, "write({fd}, {len}) = {value:#04x}"),
            Syscall::Read { fd, len } => write!(f, "read({fd}, {len})"),
            Syscall::Seek { fd, whence, offset } => {
                let whence = match whence {
                    Whence::Set => "SEEK_SET",
                    Whence::Cur => "SEEK_CUR",
                    Whence::End => "SEEK_END",
                };
                write!(f, "seek({fd}, {whence}, {offset})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    /// 1-based line in the trace file
    pub line: usize,
    pub pid: Pid,
    pub call: Syscall,
}

/// Parse one line. `Ok(None)` for blank lines, comments and skipped calls.
pub fn parse_line(line: usize, text: &str) -> Result<Option<TraceLine>, TraceError> {
    let syntax = |why: String| TraceError::Syntax { line, why };

    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }
    let (pid, rest) = text
        .split_once(char::is_whitespace)
        .ok_or_else(|| syntax(format!("no call after pid in {text:?}")))?;
    let pid: Pid = pid
        .parse()
        .map_err(|_| syntax(format!("bad pid {pid:?}")))?;

    let rest = rest.trim_start();
    let (Some(open), Some(close)) = (rest.find('('), rest.rfind(')')) else {
        return Err(syntax(format!("no argument list in {rest:?}")));
    };
    if close < open {
        return Err(syntax(format!("malformed argument list in {rest:?}")));
    }
    let name = rest[..open].trim().to_lowercase();
    let args: Vec<&str> = rest[open + 1..close].split(',').map(str::trim).collect();
    let value = rest[close + 1..]
        .trim()
        .strip_prefix('=')
        .map(str::trim);

    let number = |what: &str, s: &str| -> Result<usize, TraceError> {
        s.parse()
            .map_err(|_| syntax(format!("bad {what} {s:?} in {name}")))
    };
    let positive = |what: &str, s: &str| -> Result<usize, TraceError> {
        match number(what, s)? {
            0 => Err(syntax(format!("{name} needs a positive {what}"))),
            n => Ok(n),
        }
    };
    let arity = |n: usize| -> Result<(), TraceError> {
        if args.len() == n {
            Ok(())
        } else {
            Err(syntax(format!("{name} takes {n} arguments, got {}", args.len())))
        }
    };

    let call = match name.as_str() {
        "create" => {
            arity(1)?;
            Syscall::Create {
                name: unquote(args[0]).to_owned(),
            }
        }
        "open" => {
            arity(2)?;
            let mut flags = OpenFlags::empty();
            for mode in args[1].split('|').map(str::trim) {
                flags |= match mode {
                    "O_RDONLY" => OpenFlag::RDONLY,
                    "O_WRONLY" => OpenFlag::WRONLY,
                    "O_RDWR" => OpenFlag::RDWR,
                    "O_APPEND" => OpenFlag::APPEND,
                    _ => return Err(syntax(format!("unknown open mode {mode:?}"))),
                };
            }
            let fd = value.ok_or_else(|| syntax("open needs `= fd`".to_owned()))?;
            Syscall::Open {
                name: unquote(args[0]).to_owned(),
                flags,
                fd: number("fd", fd)?,
            }
        }
        "close" => {
            arity(1)?;
            Syscall::Close {
                fd: number("fd", args[0])?,
            }
        }
        "write" => {
            arity(2)?;
            let value = value
                .and_then(|v| v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")))
                .ok_or_else(|| syntax("write needs `= 0x<hex byte>`".to_owned()))?;
            let value = u8::from_str_radix(value, 16)
                .map_err(|_| syntax(format!("bad write data 0x{value}")))?;
            Syscall::Write {
                fd: number("fd", args[0])?,
                len: positive("length", args[1])?,
                value,
            }
        }
        "read" => {
            arity(2)?;
            Syscall::Read {
                fd: number("fd", args[0])?,
                len: positive("length", args[1])?,
            }
        }
        "seek" => {
            arity(3)?;
            let whence = match args[1] {
                "SEEK_SET" => Whence::Set,
                "SEEK_CUR" => Whence::Cur,
                "SEEK_END" => Whence::End,
                other => return Err(syntax(format!("unknown whence {other:?}"))),
            };
            let offset = args[2]
                .parse()
                .map_err(|_| syntax(format!("bad offset {:?} in seek", args[2])))?;
            Syscall::Seek {
                fd: number("fd", args[0])?,
                whence,
                offset,
            }
        }
        _ => {
            debug!("trace line {line}: skipping {name}");
            return Ok(None);
        }
    };
    Ok(Some(TraceLine { line, pid, call }))
}

fn unquote(s: &str) -> &str {
    let s = s.strip_prefix('"').unwrap_or(s);
    s.strip_suffix('"').unwrap_or(s)
}

pub fn parse(reader: impl BufRead) -> Result<Vec<TraceLine>, TraceError> {
    let mut trace = Vec::new();
    for (i, text) in reader.lines().enumerate() {
        if let Some(line) = parse_line(i + 1, &text?)? {
            trace.push(line);
        }
    }
    Ok(trace)
}

/// Outcome of a replay.
#[derive(Debug, Default)]
pub struct Replay {
    pub ok: usize,
    /// calls rejected with a caller-visible error
    pub failed: usize,
    /// bytes each process read, in order
    pub read_check: BTreeMap<Pid, Vec<u8>>,
}

/// Run `trace` against `vfs` in file order, switching `process` to each
/// line's pid. Rejected calls are counted; a device, cache or layout failure
/// ends the replay.
pub fn replay<C: BufferCache>(
    vfs: &mut Vfs<C>,
    process: &RunningProcess,
    trace: &[TraceLine],
) -> Result<Replay, VfsError> {
    let mut replay = Replay::default();
    for TraceLine { line, pid, call } in trace {
        process.switch_to(*pid);
        debug!("{pid} {call}");
        let result = match call {
            Syscall::Create { name } => vfs.create(name),
            Syscall::Open { name, flags, fd } => vfs.open(name, *flags, *fd).map(drop),
            Syscall::Close { fd } => vfs.close(*fd),
            Syscall::Write { fd, len, value } => vfs.write(*fd, *len, *value).map(drop),
            Syscall::Read { fd, len } => vfs.read_bytes(*fd, *len).map(|bytes| {
                replay.read_check.entry(*pid).or_default().extend(bytes);
            }),
            Syscall::Seek { fd, whence, offset } => vfs.seek(*fd, *whence, *offset).map(drop),
        };
        match result {
            Ok(()) => replay.ok += 1,
            Err(err) if err.errno().is_some() => {
                debug!("trace line {line}: {err}");
                replay.failed += 1;
            }
            Err(err) => return Err(err),
        }
    }
    info!("replay: {} calls, {} rejected", replay.ok + replay.failed, replay.failed);
    Ok(replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blk_dev::MemDisk;
    use common::Config;
    use disk::mkfs;
    use stat::Stats;
    use std::sync::Arc;

    #[test]
    fn parses_every_call() {
        let text = "\
# a comment
1 proc_create(2)
2 create(\"notes\")
2 open(\"notes\", O_RDWR | O_APPEND) = 7
2 write(7, 10) = 0xAB
2 seek(7, SEEK_END, -3)
2 read(7, 4)
2 compute(1, 5)
2 close(7)
";
        let trace = parse(text.as_bytes()).unwrap();
        let calls: Vec<_> = trace.iter().map(|l| l.call.clone()).collect();
        assert_eq!(
            vec![
                Syscall::Create {
                    name: "notes".into()
                },
                Syscall::Open {
                    name: "notes".into(),
                    flags: OpenFlag::RDWR | OpenFlag::APPEND,
                    fd: 7
                },
                Syscall::Write {
                    fd: 7,
                    len: 10,
                    value: 0xab
                },
                Syscall::Seek {
                    fd: 7,
                    whence: Whence::End,
                    offset: -3
                },
                Syscall::Read { fd: 7, len: 4 },
                Syscall::Close { fd: 7 },
            ],
            calls
        );
        assert_eq!(3, trace[0].line);
        assert!(trace.iter().all(|l| l.pid == 2));
    }

    #[test]
    fn display_matches_trace_syntax() {
        for text in [
            "create(\"a\")",
            "open(\"a\", O_WRONLY | O_APPEND) = 3",
            "write(3, 12) = 0x0f",
            "seek(3, SEEK_CUR, 4)",
        ] {
            let parsed = parse_line(1, &format!("1 {text}")).unwrap().unwrap();
            assert_eq!(text, parsed.call.to_string());
        }
    }

    #[test]
    fn names_may_hold_parentheses() {
        let parsed = parse_line(1, "1 create(\"a)b\")").unwrap().unwrap();
        assert!(matches!(parsed.call, Syscall::Create { ref name } if name == "a)b"));
        let parsed = parse_line(1, "1 open(\"(x)\", O_RDONLY) = 2").unwrap().unwrap();
        assert!(matches!(parsed.call, Syscall::Open { ref name, fd: 2, .. } if name == "(x)"));
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = parse("1 create(\"a\")\n1 write(3, 0) = 0x1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, TraceError::Syntax { line: 2, .. }));
        assert!(parse_line(4, "1 write(3, 2) = 12").is_err());
        assert!(parse_line(4, "1 open(\"a\", O_RDWR)").is_err());
        assert!(parse_line(4, "x create(a)").is_err());
        assert!(parse_line(4, "1 seek(3, SEEK_NOWHERE, 1)").is_err());
    }

    #[test]
    fn replay_counts_and_collects_reads() {
        let stats = Arc::new(Stats::new());
        let disk = Arc::new(MemDisk::new(64, stats.clone()));
        mkfs(disk.as_ref(), &Config::default()).unwrap();
        let process = Arc::new(RunningProcess::new(0));
        let mut vfs = Vfs::mount(disk, &Config::default(), process.clone(), stats).unwrap();
        vfs.startup().unwrap();

        let trace = parse(
            "\
1 create(\"a\")
1 create(\"a\")
1 open(\"a\", O_RDWR) = 3
1 write(3, 6) = 0x41
2 read(3, 6)
1 seek(3, SEEK_SET, 2)
1 read(3, 6)
1 close(3)
"
            .as_bytes(),
        )
        .unwrap();
        let replay = replay(&mut vfs, &process, &trace).unwrap();
        // duplicate create, read by a process that does not own fd 3
        assert_eq!(2, replay.failed);
        assert_eq!(6, replay.ok);
        // the read runs on into the zeroed tail of the block
        assert_eq!(
            Some(&vec![0x41, 0x41, 0x41, 0x41, 0, 0]),
            replay.read_check.get(&1)
        );
        assert!(!replay.read_check.contains_key(&2));
    }
}
